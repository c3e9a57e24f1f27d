//! Per-object message decoders
//!
//! Every message record starts with its report id; the meaning of the
//! remaining bytes depends on the object that owns the id. Decoders read
//! fields explicitly by offset and never assume a host struct layout.

use crate::crc::DiagCrc8;
use crate::directory::ReportIdRange;
use crate::protocol::{T6Status, TouchStatus};

/// Report ids at the start of the T100 range that carry screen status
pub const T100_RESERVED_IDS: u8 = 2;

/// T100 touch ids at or above this belong to the secondary input device
pub const T100_SECONDARY_BASE: u8 = 18;

/// T100 detect flag
pub const T100_DETECT: u8 = 0x80;

/// T100 touch type field
pub const T100_TYPE_MASK: u8 = 0x70;

/// T42 touch suppression active
pub const T42_SUPPRESS: u8 = 0x01;

/// Length of an assembled T33 diagnostic record
pub const DIAG_RECORD_LEN: usize = 41;

/// Logical input device a message contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDevice {
    /// Main touch surface
    Primary,
    /// Second touch surface sharing the controller
    Secondary,
}

/// A T9 touch report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchReport {
    /// Touch slot
    pub id: u8,
    /// Status flags
    pub status: TouchStatus,
    /// 12-bit X position
    pub x: u16,
    /// 12-bit Y position
    pub y: u16,
    /// Touch area; 0 for a linked stylus
    pub area: u8,
    /// Touch amplitude
    pub amplitude: u8,
}

/// A T100 contact report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactReport {
    /// Device the contact belongs to
    pub device: InputDevice,
    /// Touch slot within the device
    pub id: u8,
    /// Contact present
    pub detect: bool,
    /// Contact type (finger, passive stylus, hover, glove...)
    pub tool: u8,
    /// X position
    pub x: u16,
    /// Y position
    pub y: u16,
    /// Auxiliary bytes following the position
    pub aux: Vec<u8>,
}

/// Decoded content of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Command processor status with the running config checksum (T6)
    Status {
        /// Status flags
        status: T6Status,
        /// Config checksum
        config_crc: u32,
    },
    /// Touch (T9)
    Touch(TouchReport),
    /// Multi-touch contact (T100)
    Contact(ContactReport),
    /// Multi-touch screen status (T100 reserved ids)
    ScreenStatus {
        /// Index within the reserved ids
        index: u8,
        /// Status byte
        status: u8,
    },
    /// Key array state (T15)
    Keys {
        /// Key array instance
        instance: u8,
        /// Bitmap of pressed keys
        pressed: u32,
    },
    /// GPIO inputs (T19), already inverted from active-low
    Gpio {
        /// Bitmap of asserted inputs
        pressed: u8,
    },
    /// Touch suppression (T42)
    Suppression {
        /// Touches are being suppressed
        suppressed: bool,
    },
    /// Noise suppression (T48)
    Noise {
        /// Status flags
        status: u8,
        /// Noise state
        state: u8,
    },
    /// Symbol gesture (T92)
    SymbolGesture {
        /// Long stroke flag
        long_stroke: bool,
        /// Symbol code
        symbol: u8,
    },
    /// Double tap (T93)
    DoubleTap {
        /// Status byte
        status: u8,
    },
    /// Partial T33 record, buffered until the last fragment arrives
    DiagnosticFragment {
        /// Fragment index
        index: u8,
    },
    /// Complete T33 diagnostic record
    Diagnostic {
        /// Error status flags
        status: u8,
        /// Whether the record checksum matched
        crc_ok: bool,
        /// Record bytes, checksum first
        record: Vec<u8>,
    },
    /// Message with no decoder
    Unknown {
        /// Owning object type, when known
        object_type: Option<u8>,
    },
}

impl Decoded {
    /// Input device the message changes, if any
    pub fn input_device(&self) -> Option<InputDevice> {
        match self {
            Self::Touch(_) | Self::Keys { .. } | Self::Gpio { .. } => Some(InputDevice::Primary),
            Self::Contact(c) => Some(c.device),
            _ => None,
        }
    }
}

/// Decode the T6 status message
pub fn status(msg: &[u8]) -> Decoded {
    Decoded::Status {
        status: T6Status::from_bits_truncate(byte(msg, 1)),
        config_crc: byte(msg, 2) as u32 | (byte(msg, 3) as u32) << 8 | (byte(msg, 4) as u32) << 16,
    }
}

/// Decode a T9 touch message
pub fn touch(range: ReportIdRange, msg: &[u8]) -> Decoded {
    let lsb = byte(msg, 4);
    Decoded::Touch(TouchReport {
        id: msg[0] - range.min,
        status: TouchStatus::from_bits_truncate(byte(msg, 1)),
        x: (byte(msg, 2) as u16) << 4 | (lsb >> 4) as u16,
        y: (byte(msg, 3) as u16) << 4 | (lsb & 0x0F) as u16,
        area: byte(msg, 5),
        amplitude: byte(msg, 6),
    })
}

/// Decode a T100 message
pub fn multi_touch(range: ReportIdRange, msg: &[u8]) -> Decoded {
    let index = msg[0] - range.min;
    if index < T100_RESERVED_IDS {
        return Decoded::ScreenStatus {
            index,
            status: byte(msg, 1),
        };
    }

    let id = index - T100_RESERVED_IDS;
    let (device, id) = if id >= T100_SECONDARY_BASE {
        (InputDevice::Secondary, id - T100_SECONDARY_BASE)
    } else {
        (InputDevice::Primary, id)
    };
    let status = byte(msg, 1);

    Decoded::Contact(ContactReport {
        device,
        id,
        detect: status & T100_DETECT != 0,
        tool: (status & T100_TYPE_MASK) >> 4,
        x: u16::from_le_bytes([byte(msg, 2), byte(msg, 3)]),
        y: u16::from_le_bytes([byte(msg, 4), byte(msg, 5)]),
        aux: msg.get(6..).map(<[u8]>::to_vec).unwrap_or_default(),
    })
}

/// Decode a T15 key array message
pub fn keys(range: ReportIdRange, msg: &[u8]) -> Decoded {
    Decoded::Keys {
        instance: msg[0] - range.min,
        pressed: u32::from_le_bytes([byte(msg, 2), byte(msg, 3), byte(msg, 4), byte(msg, 5)]),
    }
}

/// Decode a T19 GPIO message
pub fn gpio(msg: &[u8]) -> Decoded {
    Decoded::Gpio {
        pressed: !byte(msg, 1),
    }
}

/// Decode a T42 touch suppression message
pub fn suppression(msg: &[u8]) -> Decoded {
    Decoded::Suppression {
        suppressed: byte(msg, 1) & T42_SUPPRESS != 0,
    }
}

/// Decode a T48 noise suppression message
pub fn noise(msg: &[u8]) -> Decoded {
    Decoded::Noise {
        status: byte(msg, 1),
        state: byte(msg, 4),
    }
}

/// Decode a T92 symbol gesture message
pub fn symbol_gesture(msg: &[u8]) -> Decoded {
    let status = byte(msg, 1);
    Decoded::SymbolGesture {
        long_stroke: status & 0x80 != 0,
        symbol: status & 0x0F,
    }
}

/// Decode a T93 double tap message
pub fn double_tap(msg: &[u8]) -> Decoded {
    Decoded::DoubleTap {
        status: byte(msg, 1),
    }
}

fn byte(msg: &[u8], idx: usize) -> u8 {
    msg.get(idx).copied().unwrap_or(0)
}

/// Reassembles T33 diagnostic records from five consecutive report ids
///
/// Ids 0 to 3 carry 9 bytes each, id 4 the last 5. The first byte of the
/// assembled record is a CRC8 (diagnostic polynomial) over the other 40.
#[derive(Debug, Clone)]
pub struct DiagnosticAssembler {
    record: [u8; DIAG_RECORD_LEN],
    crc: DiagCrc8,
}

impl Default for DiagnosticAssembler {
    fn default() -> Self {
        Self {
            record: [0; DIAG_RECORD_LEN],
            crc: DiagCrc8::new(),
        }
    }
}

impl DiagnosticAssembler {
    /// Feed one T33 message
    pub fn feed(&mut self, range: ReportIdRange, msg: &[u8]) -> Decoded {
        let index = msg[0] - range.min;
        let (start, len) = match index {
            0..=3 => (9 * index as usize, 9),
            4 => (36, 5),
            _ => return Decoded::Unknown { object_type: Some(crate::protocol::object::SPT_ENH_DIAG_CTRL_T33) },
        };

        for (i, slot) in self.record[start..start + len].iter_mut().enumerate() {
            *slot = byte(msg, 1 + i);
        }

        if index == 0 && self.record[1] & 0x1F != 0 {
            log::debug!("diagnostic: status 0x{:02X}", self.record[1]);
        }

        if index < 4 {
            return Decoded::DiagnosticFragment { index };
        }

        let calculated = self.crc.checksum(&self.record[1..]);
        let crc_ok = calculated == self.record[0];
        if !crc_ok {
            log::debug!(
                "diagnostic: record CRC 0x{:02X}, calculated 0x{:02X}",
                self.record[0],
                calculated
            );
        }
        Decoded::Diagnostic {
            status: self.record[1],
            crc_ok,
            record: self.record.to_vec(),
        }
    }
}
