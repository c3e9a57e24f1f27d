//! Bus registration and dispatch
//!
//! This module provides a registry of the bus backends compiled in, with
//! feature-gated inclusion and help text generation.

use mxt_core::bus::I2cBus;

/// Information about a bus backend
pub struct BusInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// An opened bus together with the controller's application address
pub struct OpenBus {
    /// The bus
    pub bus: Box<dyn I2cBus + Send>,
    /// Application address
    pub address: u8,
}

/// Get information about all available buses (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_buses() -> Vec<BusInfo> {
    let mut buses = Vec::new();

    #[cfg(feature = "dummy")]
    buses.push(BusInfo {
        name: "dummy",
        aliases: &[],
        description: "Emulated controller (profile=plain|crc,family=<id>,variant=<id>,addr=<addr>)",
    });

    #[cfg(feature = "linux-i2c")]
    buses.push(BusInfo {
        name: "linux_i2c",
        aliases: &["linux-i2c", "i2cdev"],
        description: "Linux i2c-dev (dev=/dev/i2c-N|bus=N,addr=<addr>,chip=<gpiochip>,chg=<line>)",
    });

    buses
}

/// Generate help text listing all available buses
pub fn bus_help() -> String {
    let buses = available_buses();

    if buses.is_empty() {
        return "No buses available (recompile with bus features enabled)".to_string();
    }

    let mut help = String::from("Available buses:\n");
    for b in &buses {
        help.push_str(&format!("  {:10} - {}\n", b.name, b.description));
    }
    help
}

/// Generate a short list of bus names for CLI help
pub fn bus_names_short() -> String {
    let buses = available_buses();
    let names: Vec<&str> = buses.iter().map(|b| b.name).collect();
    names.join(", ")
}

/// Find the canonical name of a bus by name or alias
pub fn find_bus(name: &str) -> Option<&'static str> {
    available_buses()
        .into_iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .map(|b| b.name)
}

/// Open the bus named by a connection string
///
/// The string can be just the name (e.g., "dummy") or include
/// parameters (e.g., "linux_i2c:bus=1,addr=0x4b").
pub fn open_bus(spec: &str) -> Result<OpenBus, Box<dyn std::error::Error>> {
    let (name, options) = parse_bus_string(spec);

    let canonical_name = find_bus(name).ok_or_else(|| unknown_bus_error(name))?;

    let (bus, address) = match canonical_name {
        #[cfg(feature = "dummy")]
        "dummy" => mxt_dummy::open_dummy(&options)
            .map_err(|e| format!("Invalid dummy parameters: {}", e))?,

        #[cfg(feature = "linux-i2c")]
        "linux_i2c" => {
            log::info!("Opening Linux I2C bus...");
            mxt_linux_i2c::open_linux_i2c(&options).map_err(|e| {
                format!(
                    "Failed to open Linux I2C bus: {}\n\
                     Make sure i2c-dev is loaded and you have read/write permissions.\n\
                     You may need to: sudo usermod -aG i2c $USER",
                    e
                )
            })?
        }

        _ => return Err(unknown_bus_error(name)),
    };

    Ok(OpenBus { bus, address })
}

/// Parse a bus string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_bus_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_bus_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown bus: {}\n\n", name);
    msg.push_str(&bus_help());
    msg.push_str("\nUse 'mxtctl list-buses' for more details");
    msg.into()
}
