//! Message monitor command

use super::{hex_bytes, Device};
use mxt_core::messages::{Decoded, InputDevice, Message, MessageSink};
use mxt_core::SessionState;
use std::time::{Duration, Instant};

/// CHG wait per loop iteration
const WAIT_SLICE_MS: u32 = 100;

/// Sink printing one line per message
struct Printer {
    raw: bool,
    seen: usize,
}

impl MessageSink for Printer {
    fn message(&mut self, message: &Message) {
        self.seen += 1;
        if self.raw {
            println!("[{:3}] {}", message.report_id, hex_bytes(&message.data));
        } else {
            println!("[{:3}] {}", message.report_id, describe(&message.decoded));
        }
    }

    fn sync(&mut self, device: InputDevice) {
        log::trace!("sync {:?}", device);
    }
}

/// One line description of a decoded message
fn describe(decoded: &Decoded) -> String {
    match decoded {
        Decoded::Status { status, config_crc } => {
            format!("status {:?} config CRC 0x{:06X}", status, config_crc)
        }
        Decoded::Touch(t) => format!(
            "touch {} {:?} x={} y={} area={} amplitude={}",
            t.id, t.status, t.x, t.y, t.area, t.amplitude
        ),
        Decoded::Contact(c) => format!(
            "contact {:?} {} {} tool={} x={} y={}{}",
            c.device,
            c.id,
            if c.detect { "down" } else { "up" },
            c.tool,
            c.x,
            c.y,
            if c.aux.is_empty() {
                String::new()
            } else {
                format!(" aux={}", hex_bytes(&c.aux))
            }
        ),
        Decoded::ScreenStatus { index, status } => {
            format!("screen status {} 0x{:02X}", index, status)
        }
        Decoded::Keys { instance, pressed } => {
            format!("keys instance {} pressed 0x{:08X}", instance, pressed)
        }
        Decoded::Gpio { pressed } => format!("gpio pressed 0x{:02X}", pressed),
        Decoded::Suppression { suppressed } => format!("suppression {}", suppressed),
        Decoded::Noise { status, state } => {
            format!("noise status 0x{:02X} state {}", status, state)
        }
        Decoded::SymbolGesture {
            long_stroke,
            symbol,
        } => format!("symbol 0x{:02X}{}", symbol, if *long_stroke { " long" } else { "" }),
        Decoded::DoubleTap { status } => format!("double tap 0x{:02X}", status),
        Decoded::DiagnosticFragment { index } => format!("diagnostic fragment {}", index),
        Decoded::Diagnostic {
            status,
            crc_ok,
            record,
        } => format!(
            "diagnostic status 0x{:02X} crc {} ({} bytes)",
            status,
            if *crc_ok { "ok" } else { "BAD" },
            record.len()
        ),
        Decoded::Unknown {
            object_type: Some(t),
        } => format!("T{} (no decoder)", t),
        Decoded::Unknown { object_type: None } => "unassigned report id".to_string(),
    }
}

/// Drain and print messages until `count` were seen or `timeout_ms` passes idle
pub fn run_messages(
    ctl: &mut Device,
    count: Option<usize>,
    timeout_ms: Option<u64>,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !matches!(ctl.state(), SessionState::Normal { .. }) {
        return Err(format!("Cannot read messages in {:?}", ctl.state()).into());
    }

    let mut printer = Printer { raw, seen: 0 };
    let idle_limit = timeout_ms.map(Duration::from_millis);
    let mut last_message = Instant::now();

    loop {
        if ctl.bus_mut().wait_chg(WAIT_SLICE_MS)? {
            let before = printer.seen;
            ctl.handle_interrupt(&mut printer)?;
            if printer.seen > before {
                last_message = Instant::now();
            }
        }

        if count.is_some_and(|n| printer.seen >= n) {
            break;
        }
        if idle_limit.is_some_and(|limit| last_message.elapsed() >= limit) {
            log::info!("No message for {} ms, stopping", last_message.elapsed().as_millis());
            break;
        }
    }

    log::info!("{} message(s)", printer.seen);
    Ok(())
}
