//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u8>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u16
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u16>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse an object type, with or without the leading `T`
fn parse_object_type(s: &str) -> Result<u8, String> {
    let s = s
        .strip_prefix('T')
        .or_else(|| s.strip_prefix('t'))
        .unwrap_or(s);
    parse_hex_u8(s)
}

/// Parse a data byte, always hex, with or without `0x`
fn parse_data_byte(s: &str) -> Result<u8, String> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid data byte '{}': {}", s, e))
}

#[derive(Parser)]
#[command(name = "mxtctl")]
#[command(author, version, about = "maXTouch touch controller utility", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Device profile (TOML) with bus string and engine settings
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Bus selection shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BusArgs {
    /// Bus connection string, e.g. linux_i2c:dev=/dev/i2c-1,addr=0x4a
    /// (overrides the profile's bus)
    #[arg(short, long)]
    pub bus: Option<String>,
}

/// Register or object selection for read and write
#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Object type (e.g. 7, T7 or 0x07)
    #[arg(short = 'T', long, value_parser = parse_object_type)]
    pub object: Option<u8>,

    /// Raw register address (hex, e.g. 0x0100)
    #[arg(short, long, value_parser = parse_hex_u16)]
    pub register: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the info block and session state
    Info {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// List the object table
    Objects {
        #[command(flatten)]
        bus: BusArgs,

        /// Also read and print the contents of every readable object
        #[arg(long)]
        dump: bool,
    },

    /// Read an object instance or raw registers
    Read {
        #[command(flatten)]
        bus: BusArgs,

        #[command(flatten)]
        target: Target,

        /// Object instance
        #[arg(short, long, default_value = "0")]
        instance: usize,

        /// Number of bytes to read (raw registers only)
        #[arg(short, long, default_value = "1")]
        len: usize,
    },

    /// Write bytes into an object instance or raw registers
    Write {
        #[command(flatten)]
        bus: BusArgs,

        #[command(flatten)]
        target: Target,

        /// Object instance
        #[arg(short, long, default_value = "0")]
        instance: usize,

        /// Byte offset within the object
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Hex data bytes (e.g. 0a ff 00)
        #[arg(required = true, num_args = 1.., value_parser = parse_data_byte)]
        data: Vec<u8>,
    },

    /// Print decoded messages as they arrive
    Messages {
        #[command(flatten)]
        bus: BusArgs,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop after this many milliseconds without a message
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print raw records instead of decoded messages
        #[arg(long)]
        raw: bool,
    },

    /// Apply an OBP_RAW configuration file
    ApplyConfig {
        #[command(flatten)]
        bus: BusArgs,

        /// Configuration file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Zero the configuration and back it up
    ClearConfig {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Flash a firmware image through the bootloader
    Flash {
        #[command(flatten)]
        bus: BusArgs,

        /// Binary firmware image
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Soft reset the controller
    Reset {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Force a recalibration
    Calibrate {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Back up the running configuration to non-volatile memory
    Backup {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Re-establish sequence numbers on a CRC-framed device
    Resync {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Show or set the transmit sequence number
    Seq {
        #[command(flatten)]
        bus: BusArgs,

        /// New sequence number
        #[arg(long, value_parser = parse_hex_u8)]
        set: Option<u8>,
    },

    /// List supported buses
    ListBuses,
}
