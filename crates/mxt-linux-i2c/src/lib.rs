//! mxt-linux-i2c - Linux i2c-dev support
//!
//! This crate provides access to maXTouch controllers on a Linux I2C
//! adapter through the `/dev/i2c-N` device interface, with an optional
//! CHG line requested from a GPIO character device.
//!
//! # Example
//!
//! ```no_run
//! use mxt_linux_i2c::{LinuxI2c, LinuxI2cConfig};
//! use mxt_core::{Controller, EngineConfig};
//!
//! let config = LinuxI2cConfig::new("/dev/i2c-1")
//!     .with_address(0x4a)
//!     .with_chg("/dev/gpiochip0", 17);
//! let bus = LinuxI2c::open(&config)?;
//!
//! let mut ctl = Controller::new(bus, 0x4a, EngineConfig::default());
//! ctl.initialize()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with mxtctl CLI
//!
//! ```bash
//! # Polling, no CHG line
//! mxtctl info -b linux_i2c:dev=/dev/i2c-1,addr=0x4a
//!
//! # With the CHG line on gpiochip0 line 17
//! mxtctl messages -b linux_i2c:bus=1,gpiochip=0,chg=17
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with i2c-dev support (`CONFIG_I2C_CHARDEV`)
//! - Read/write access to `/dev/i2c-N` and, for CHG, `/dev/gpiochipN`
//! - No kernel touchscreen driver bound to the controller

#![warn(rust_2018_idioms)]

pub mod chg;
pub mod device;
pub mod error;

// Re-exports
pub use chg::ChgLine;
pub use device::{parse_options, LinuxI2c, LinuxI2cConfig, DEFAULT_ADDRESS};
pub use error::{LinuxI2cError, Result};

/// Open a Linux I2C bus and return it boxed, with the controller address
///
/// This is a convenience function for use in the CLI bus dispatch.
///
/// # Example Options
///
/// - `dev=/dev/i2c-1` or `bus=1` - Required: adapter
/// - `addr=0x4a` - Optional: application address (default: 0x4a)
/// - `chip=/dev/gpiochip0` or `gpiochip=0` - Optional: CHG GPIO chip
/// - `chg=17` - Optional: CHG line offset, required with `chip`
pub fn open_linux_i2c(
    options: &[(&str, &str)],
) -> std::result::Result<(Box<dyn mxt_core::bus::I2cBus + Send>, u8), Box<dyn std::error::Error>>
{
    let config = parse_options(options)?;
    let bus = LinuxI2c::open(&config)?;
    let address = bus.address();
    Ok((Box::new(bus), address))
}
