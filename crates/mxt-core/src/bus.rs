//! Bus abstraction
//!
//! maXTouch controllers sit on an I2C bus and signal pending messages on
//! an active-low CHG line. The application firmware and the bootloader
//! answer on different 7-bit addresses, so every call names its target.

use crate::error::Result;

/// Default slice used to pace polling when no CHG line is available
pub const CHG_POLL_MS: u32 = 10;

/// I2C bus with an optional CHG (change) line
///
/// Implementations perform whole transactions: a failed or short transfer
/// must be reported as [`crate::Error::Bus`].
pub trait I2cBus {
    /// Write `data` to the device at `addr` in a single transfer
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Read `buf.len()` bytes from the device at `addr`
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `data` then read into `buf` as one combined transaction
    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()>;

    /// Delay for the specified number of milliseconds
    fn delay_ms(&mut self, ms: u32);

    /// Wait up to `timeout_ms` for the CHG line to assert
    ///
    /// Returns `Ok(false)` if the line stayed deasserted for the whole
    /// timeout. Buses without a CHG line pace the caller and report the
    /// line as asserted so it goes and checks.
    fn wait_chg(&mut self, timeout_ms: u32) -> Result<bool> {
        self.delay_ms(timeout_ms.min(CHG_POLL_MS));
        Ok(true)
    }
}

impl I2cBus for Box<dyn I2cBus + Send> {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        (**self).write_read(addr, data, buf)
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }

    fn wait_chg(&mut self, timeout_ms: u32) -> Result<bool> {
        (**self).wait_chg(timeout_ms)
    }
}
