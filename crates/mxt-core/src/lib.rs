//! mxt-core - Object protocol engine for maXTouch touch controllers
//!
//! This crate implements the host side of the maXTouch object based
//! protocol: register transport (plain and CRC8-framed), sequence number
//! tracking and resynchronization, parsing of the object directory,
//! the message drain pipeline, raw configuration apply, and the
//! bootloader firmware flash handshake.
//!
//! The engine talks to hardware through the [`bus::I2cBus`] trait, so the
//! same code runs against Linux i2c-dev or an in-memory emulator.
//!
//! # Example
//!
//! ```ignore
//! use mxt_core::{Controller, EngineConfig};
//!
//! fn show_info<B: mxt_core::bus::I2cBus>(bus: B) -> mxt_core::Result<()> {
//!     let mut ctl = Controller::new(bus, 0x4a, EngineConfig::default());
//!     ctl.initialize()?;
//!     if let Some(dir) = ctl.directory() {
//!         println!("Family {:02X} Variant {:02X}", dir.info().family_id, dir.info().variant_id);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bootloader;
pub mod bus;
pub mod config;
pub mod crc;
pub mod directory;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod resync;
pub mod session;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use session::{Controller, EngineConfig, SessionState};
