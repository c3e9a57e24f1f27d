//! CHG line on a GPIO character device
//!
//! The controller pulls CHG low while it has messages queued. The line is
//! requested as an input with falling edge detection so a wait can sleep
//! in the kernel instead of polling the level.

use crate::error::{LinuxI2cError, Result};

use gpiocdev::line::{EdgeDetection, Offset, Value};
use gpiocdev::Request;

use std::time::Duration;

/// A requested CHG input line
pub struct ChgLine {
    request: Request,
    offset: Offset,
}

impl ChgLine {
    /// Request `offset` on `chip` as the CHG input
    pub fn open(chip: &str, offset: Offset) -> Result<Self> {
        log::debug!("linux_i2c: Requesting CHG line {} on {}", offset, chip);

        let request = Request::builder()
            .on_chip(chip)
            .with_consumer("mxtctl")
            .with_line(offset)
            .as_input()
            .with_edge_detection(EdgeDetection::FallingEdge)
            .request()
            .map_err(|e| LinuxI2cError::ChgRequestFailed {
                chip: chip.to_string(),
                offset,
                source: e,
            })?;

        Ok(Self { request, offset })
    }

    /// Whether the line is currently held low
    pub fn is_asserted(&self) -> Result<bool> {
        let value = self
            .request
            .value(self.offset)
            .map_err(LinuxI2cError::ChgWaitFailed)?;
        Ok(value == Value::Inactive)
    }

    /// Wait up to `timeout` for the line to go low
    ///
    /// Edges queued before the call are discarded; the level is checked
    /// first so a line that is already low returns immediately.
    pub fn wait_asserted(&self, timeout: Duration) -> Result<bool> {
        while self
            .request
            .has_edge_event()
            .map_err(LinuxI2cError::ChgWaitFailed)?
        {
            self.request
                .read_edge_event()
                .map_err(LinuxI2cError::ChgWaitFailed)?;
        }

        if self.is_asserted()? {
            return Ok(true);
        }

        let edge = self
            .request
            .wait_edge_event(timeout)
            .map_err(LinuxI2cError::ChgWaitFailed)?;
        if edge {
            self.request
                .read_edge_event()
                .map_err(LinuxI2cError::ChgWaitFailed)?;
        }
        Ok(edge)
    }
}
