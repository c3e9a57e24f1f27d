//! CLI command implementations
//!
//! Every command except `list-buses` opens a bus, brings up a
//! [`Controller`] on it and runs against that session.

pub mod config;
pub mod control;
pub mod firmware;
pub mod info;
mod list;
pub mod messages;
pub mod objects;

pub use list::list_buses;

use crate::buses;
use crate::cli::BusArgs;
use crate::profile::Profile;

use mxt_core::bus::I2cBus;
use mxt_core::{Controller, EngineConfig};

/// Controller on whichever bus was selected
pub type Device = Controller<Box<dyn I2cBus + Send>>;

/// Open the selected bus and initialize the controller on it
///
/// The bus comes from `--bus`, else from the profile.
pub fn connect(
    args: &BusArgs,
    profile: &Profile,
    engine: EngineConfig,
) -> Result<Device, Box<dyn std::error::Error>> {
    let spec = args
        .bus
        .as_deref()
        .or(profile.bus.as_deref())
        .ok_or("No bus given. Use --bus or a profile with a 'bus' entry")?;

    let opened = buses::open_bus(spec)?;
    let mut ctl = Controller::new(opened.bus, opened.address, engine);
    ctl.initialize()?;
    log::debug!("Session state after initialize: {:?}", ctl.state());
    Ok(ctl)
}

/// Format bytes as space separated hex
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
