//! Bootloader flash engine
//!
//! The bootloader answers on its own bus address and speaks a byte
//! oriented protocol: the host reads one status byte, unlocks the
//! bootloader, then sends the firmware image frame by frame. Every frame
//! is `[len_hi, len_lo, body...]` where the body ends with a CRC the
//! bootloader checks before asking for the next frame. A frame that fails
//! its check is resent unchanged after an escalating back-off.

use std::ops::Range;

use crate::bus::I2cBus;
use crate::error::{Error, Result};
use crate::protocol::timing;

/// Status byte values
pub mod status {
    /// Waiting for the unlock command (top two bits)
    pub const WAITING_BOOTLOAD_CMD: u8 = 0xC0;
    /// Waiting for frame data (top two bits)
    pub const WAITING_FRAME_DATA: u8 = 0x80;
    /// Application CRC failed (top two bits)
    pub const APP_CRC_FAIL: u8 = 0x40;
    /// Frame CRC check in progress
    pub const FRAME_CRC_CHECK: u8 = 0x02;
    /// Frame CRC check failed
    pub const FRAME_CRC_FAIL: u8 = 0x03;
    /// Frame CRC check passed
    pub const FRAME_CRC_PASS: u8 = 0x04;
    /// Bits that carry the id or flags rather than the state
    pub const STATUS_MASK: u8 = 0x3F;
    /// Extended id follows the status byte
    pub const EXTENDED_ID: u8 = 0x20;
    /// Bootloader id when the extended id flag is clear
    pub const ID_MASK: u8 = 0x1F;
}

/// Unlock command
pub const UNLOCK_COMMAND: [u8; 2] = [0xDC, 0xAA];

/// Leave the bootloader and start the application
pub const EXIT_COMMAND: [u8; 2] = [0x01, 0x01];

/// Retries of one frame before the flash is aborted
pub const FRAME_RETRIES: u32 = 20;

/// Back-off added per retry
pub const RETRY_BACKOFF_MS: u32 = 20;

/// Frames between progress log lines
pub const PROGRESS_INTERVAL: usize = 50;

const RECHECK_LIMIT: u32 = 100;

/// Bootloader state decoded from a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderState {
    /// Waiting for the unlock command
    WaitingCommand {
        /// The application image failed its CRC
        app_crc_fail: bool,
    },
    /// Waiting for a frame
    WaitingFrame,
    /// Checking the last frame
    FrameCrcCheck,
    /// The last frame was rejected
    FrameCrcFail,
    /// The last frame was accepted
    FrameCrcPass,
    /// Anything else
    Unknown(u8),
}

impl BootloaderState {
    /// Decode a status byte
    pub fn from_status(val: u8) -> Self {
        match val {
            status::FRAME_CRC_CHECK => Self::FrameCrcCheck,
            status::FRAME_CRC_FAIL => Self::FrameCrcFail,
            status::FRAME_CRC_PASS => Self::FrameCrcPass,
            _ => match val & !status::STATUS_MASK {
                status::WAITING_BOOTLOAD_CMD => Self::WaitingCommand {
                    app_crc_fail: false,
                },
                status::APP_CRC_FAIL => Self::WaitingCommand { app_crc_fail: true },
                status::WAITING_FRAME_DATA => Self::WaitingFrame,
                _ => Self::Unknown(val),
            },
        }
    }
}

/// State the host expects the bootloader to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Waiting for the unlock command
    Command,
    /// Waiting for frame data
    Frame,
    /// Last frame passed its CRC check
    FramePass,
}

impl Expect {
    fn status(self) -> u8 {
        match self {
            Self::Command => status::WAITING_BOOTLOAD_CMD,
            Self::Frame => status::WAITING_FRAME_DATA,
            Self::FramePass => status::FRAME_CRC_PASS,
        }
    }
}

/// Bootloader address for an application address
///
/// `0x4a`/`0x4b` map down by `0x24` on newer families (or when retrying
/// with the alternate scheme) and by `0x26` otherwise.
pub fn bootloader_address(app_address: u8, family_id: u8, retry: bool) -> Result<u8> {
    let address = match app_address {
        0x4a | 0x4b if retry || family_id >= 0xa2 => app_address - 0x24,
        0x4a | 0x4b | 0x4c | 0x4d | 0x5a | 0x5b => app_address - 0x26,
        _ => {
            return Err(Error::protocol(format!(
                "application address 0x{:02x} has no bootloader mapping",
                app_address
            )))
        }
    };
    log::info!("bootloader: address 0x{:02x}", address);
    Ok(address)
}

/// A firmware image split into frames
#[derive(Debug, Clone)]
pub struct FirmwareImage<'a> {
    data: &'a [u8],
    frames: Vec<Range<usize>>,
}

impl<'a> FirmwareImage<'a> {
    /// Validate an image and locate its frames
    ///
    /// Images that are plain hex text (undecoded `.enc` files) and images
    /// whose last frame is cut short are rejected before anything is sent.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::format("firmware image is empty"));
        }
        if data
            .iter()
            .all(|b| b.is_ascii_hexdigit() || b.is_ascii_whitespace())
        {
            return Err(Error::format(
                "firmware image is hex text, it must be converted to binary",
            ));
        }

        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(Error::format(format!(
                    "firmware truncated in frame {} header",
                    frames.len()
                )));
            }
            let size = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize + 2;
            if pos + size > data.len() {
                return Err(Error::format(format!(
                    "firmware frame {} truncated: needs {} bytes, {} left",
                    frames.len(),
                    size,
                    data.len() - pos
                )));
            }
            frames.push(pos..pos + size);
            pos += size;
        }

        Ok(Self { data, frames })
    }

    /// Number of frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame `index` as sent on the wire
    pub fn frame(&self, index: usize) -> &'a [u8] {
        &self.data[self.frames[index].clone()]
    }

    /// Image size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty (never true for a parsed image)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Progress callbacks for firmware flashing
pub trait FlashProgress {
    /// Flashing starts
    fn frames_total(&mut self, _frames: usize, _bytes: usize) {}

    /// A frame was accepted
    fn frame_sent(&mut self, _frame: usize, _bytes_done: usize) {}

    /// A frame is being retried
    fn retry(&mut self, _frame: usize, _attempt: u32) {}

    /// All frames were sent
    fn finish(&mut self) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FlashProgress for NoProgress {}

/// Statistics of a completed flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashReport {
    /// Frames sent
    pub frames: usize,
    /// Failed frame checks that were retried
    pub retries: u32,
    /// Bytes sent, excluding retries
    pub bytes: usize,
}

/// Id information read from an extended status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderId {
    /// Bootloader id
    pub id: u8,
    /// Bootloader version, when reported
    pub version: Option<u8>,
}

/// Connection to the bootloader
#[derive(Debug, Clone)]
pub struct Bootloader {
    address: u8,
    chg_timeout_ms: u32,
    frame_retries: u32,
}

impl Bootloader {
    /// Talk to the bootloader at `address`
    pub fn new(address: u8) -> Self {
        Self {
            address,
            chg_timeout_ms: timing::FW_CHG_TIMEOUT,
            frame_retries: FRAME_RETRIES,
        }
    }

    /// Override the CHG wait per state change
    pub fn with_chg_timeout(mut self, timeout_ms: u32) -> Self {
        self.chg_timeout_ms = timeout_ms;
        self
    }

    /// Override the retry bound per frame
    pub fn with_frame_retries(mut self, retries: u32) -> Self {
        self.frame_retries = retries;
        self
    }

    /// Bus address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Read the raw status byte
    pub fn read_status<B: I2cBus>(&self, bus: &mut B) -> Result<u8> {
        let mut val = [0u8; 1];
        bus.read(self.address, &mut val)?;
        Ok(val[0])
    }

    /// Check whether a bootloader answers
    pub fn probe<B: I2cBus>(&self, bus: &mut B) -> Result<BootloaderState> {
        let val = self.read_status(bus)?;
        let state = BootloaderState::from_status(val);
        let crc_failure = matches!(state, BootloaderState::WaitingCommand { app_crc_fail: true });
        log::warn!(
            "bootloader: detected at 0x{:02x}, status {:02X}{}",
            self.address,
            val,
            if crc_failure { ", APP_CRC_FAIL" } else { "" }
        );
        Ok(state)
    }

    /// Send the unlock command
    pub fn unlock<B: I2cBus>(&self, bus: &mut B) -> Result<()> {
        bus.write(self.address, &UNLOCK_COMMAND)
    }

    /// Ask the bootloader to start the application
    pub fn exit<B: I2cBus>(&self, bus: &mut B) -> Result<()> {
        bus.write(self.address, &EXIT_COMMAND)
    }

    /// Read the extended id that follows a status with [`status::EXTENDED_ID`]
    fn read_id<B: I2cBus>(&self, bus: &mut B, val: u8) -> (u8, BootloaderId) {
        if val & status::EXTENDED_ID == 0 {
            let id = BootloaderId {
                id: val & status::ID_MASK,
                version: None,
            };
            log::debug!("bootloader: id {}", id.id);
            return (val, id);
        }

        let mut buf = [0u8; 3];
        match bus.read(self.address, &mut buf) {
            Ok(()) => {
                log::debug!("bootloader: id {} version {}", buf[1], buf[2]);
                (
                    buf[0],
                    BootloaderId {
                        id: buf[1],
                        version: Some(buf[2]),
                    },
                )
            }
            Err(e) => {
                log::error!("bootloader: reading extended id failed: {}", e);
                (
                    val,
                    BootloaderId {
                        id: val & status::ID_MASK,
                        version: None,
                    },
                )
            }
        }
    }

    fn wait<B: I2cBus>(&self, bus: &mut B) -> Result<()> {
        if bus.wait_chg(self.chg_timeout_ms)? {
            Ok(())
        } else {
            Err(Error::Timeout {
                what: "bootloader state change",
                timeout_ms: self.chg_timeout_ms,
            })
        }
    }

    /// Check that the bootloader is in the `expect`ed state
    ///
    /// With `wait` the CHG line is awaited before each status read. While
    /// a frame check is in progress the status is read again.
    pub fn check<B: I2cBus>(&self, bus: &mut B, expect: Expect, wait: bool) -> Result<()> {
        for _ in 0..RECHECK_LIMIT {
            if wait {
                self.wait(bus)?;
            }

            let mut val = self.read_status(bus)?;
            if expect == Expect::Command {
                val = self.read_id(bus, val).0;
            }

            match expect {
                Expect::Command | Expect::Frame => val &= !status::STATUS_MASK,
                Expect::FramePass => match val {
                    status::FRAME_CRC_CHECK => continue,
                    status::FRAME_CRC_FAIL => {
                        return Err(Error::Crc("bootloader frame CRC fail".into()));
                    }
                    _ => {}
                },
            }

            if val != expect.status() {
                return Err(Error::protocol(format!(
                    "invalid bootloader state {:02X} != {:02X}",
                    val,
                    expect.status()
                )));
            }
            return Ok(());
        }

        Err(Error::Timeout {
            what: "bootloader frame check",
            timeout_ms: self.chg_timeout_ms * RECHECK_LIMIT,
        })
    }

    /// Unlock if needed, then send every frame of `image`
    ///
    /// A bootloader already waiting for frame data (left unlocked by an
    /// earlier attempt) is used as is.
    pub fn flash<B: I2cBus>(
        &self,
        bus: &mut B,
        image: &FirmwareImage<'_>,
        progress: &mut dyn FlashProgress,
    ) -> Result<FlashReport> {
        match self.check(bus, Expect::Command, false) {
            Ok(()) => {
                log::info!("bootloader: unlocking");
                self.unlock(bus)?;
            }
            Err(e) => {
                log::debug!("bootloader: not waiting for command ({}), trying frame state", e);
                self.check(bus, Expect::Frame, false)?;
            }
        }

        let mut report = FlashReport::default();
        let mut retry = 0;
        let mut index = 0;
        progress.frames_total(image.frame_count(), image.len());

        while index < image.frame_count() {
            self.check(bus, Expect::Frame, true)?;

            let frame = image.frame(index);
            bus.write(self.address, frame)?;

            match self.check(bus, Expect::FramePass, true) {
                Ok(()) => {
                    retry = 0;
                    index += 1;
                    report.frames += 1;
                    report.bytes += frame.len();
                    progress.frame_sent(index, report.bytes);

                    if index == image.frame_count() {
                        log::info!("bootloader: sent {} frames, {} bytes", index, report.bytes);
                    } else if index % PROGRESS_INTERVAL == 0 {
                        log::info!(
                            "bootloader: sent {} frames, {}/{} bytes",
                            index,
                            report.bytes,
                            image.len()
                        );
                    }
                }
                Err(e) => {
                    retry += 1;
                    report.retries += 1;
                    progress.retry(index, retry);
                    log::warn!("bootloader: frame {} failed ({}), retry {}", index, e, retry);

                    bus.delay_ms(RETRY_BACKOFF_MS * retry);

                    if retry > self.frame_retries {
                        log::error!("bootloader: retry count exceeded");
                        return Err(Error::protocol(format!(
                            "frame {} failed {} times: {}",
                            index, retry, e
                        )));
                    }
                }
            }
        }

        progress.finish();

        // Not every bootloader asserts CHG once it has finished
        bus.delay_ms(timing::BOOTLOADER_WAIT);
        match bus.wait_chg(timing::BOOTLOADER_WAIT) {
            Ok(true) => {}
            Ok(false) => log::debug!("bootloader: no CHG after the last frame"),
            Err(e) => log::debug!("bootloader: waiting for completion failed: {}", e),
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootloader_address() {
        assert_eq!(bootloader_address(0x4a, 0x81, false).unwrap(), 0x24);
        assert_eq!(bootloader_address(0x4a, 0xa6, false).unwrap(), 0x26);
        assert_eq!(bootloader_address(0x4b, 0x81, true).unwrap(), 0x27);
        assert_eq!(bootloader_address(0x4c, 0xa6, true).unwrap(), 0x26);
        assert_eq!(bootloader_address(0x5b, 0x00, false).unwrap(), 0x35);
        assert!(bootloader_address(0x10, 0x81, false).is_err());
    }

    #[test]
    fn test_state_decode() {
        assert_eq!(
            BootloaderState::from_status(0xC5),
            BootloaderState::WaitingCommand { app_crc_fail: false }
        );
        assert_eq!(
            BootloaderState::from_status(0x45),
            BootloaderState::WaitingCommand { app_crc_fail: true }
        );
        assert_eq!(BootloaderState::from_status(0x80), BootloaderState::WaitingFrame);
        assert_eq!(BootloaderState::from_status(0x02), BootloaderState::FrameCrcCheck);
        assert_eq!(BootloaderState::from_status(0x03), BootloaderState::FrameCrcFail);
        assert_eq!(BootloaderState::from_status(0x04), BootloaderState::FrameCrcPass);
        assert_eq!(BootloaderState::from_status(0x11), BootloaderState::Unknown(0x11));
    }

    #[test]
    fn test_image_frames() {
        #[rustfmt::skip]
        let data = [
            0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x11, 0x22,
            0x00, 0x00, 0x33, 0x44,
        ];
        let image = FirmwareImage::parse(&data).unwrap();
        assert_eq!(image.frame_count(), 2);
        assert_eq!(image.frame(0), &data[..7]);
        assert_eq!(image.frame(1), &data[7..]);
        assert_eq!(image.len(), 11);
    }

    #[test]
    fn test_image_truncated() {
        let data = [0x00, 0x05, 0xAA, 0xBB];
        let err = FirmwareImage::parse(&data).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);

        let data = [0x00, 0x00, 0xAA, 0xBB, 0x00];
        assert!(FirmwareImage::parse(&data).is_err());
    }

    #[test]
    fn test_image_hex_text_rejected() {
        let err = FirmwareImage::parse(b"0A1B2C3D\n4E5F\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
        assert!(FirmwareImage::parse(&[]).is_err());
    }
}
