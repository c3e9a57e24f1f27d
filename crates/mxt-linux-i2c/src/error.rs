//! Error types for Linux I2C operations

use thiserror::Error;

/// Linux I2C specific errors
#[derive(Debug, Error)]
pub enum LinuxI2cError {
    /// Failed to open device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to query adapter functionality
    #[error("Failed to query functionality of {path}: {source}")]
    FuncsFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Adapter cannot do plain I2C transfers
    #[error("{0} does not support combined I2C transfers")]
    NoI2cSupport(String),

    /// I2C transfer failed
    #[error("I2C transfer to 0x{addr:02x} failed: {source}")]
    TransferFailed {
        addr: u8,
        #[source]
        source: std::io::Error,
    },

    /// Transfer longer than a single i2c_msg can carry
    #[error("Transfer of {0} bytes is too long")]
    TransferTooLong(usize),

    /// Failed to request the CHG line
    #[error("Failed to request CHG line {offset} on {chip}: {source}")]
    ChgRequestFailed {
        chip: String,
        offset: u32,
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed while waiting on the CHG line
    #[error("CHG line wait failed: {0}")]
    ChgWaitFailed(#[source] gpiocdev::Error),

    /// Device not specified
    #[error("No device specified. Use dev=/dev/i2c-N or bus=N")]
    NoDevice,
}

impl From<LinuxI2cError> for mxt_core::Error {
    fn from(e: LinuxI2cError) -> Self {
        mxt_core::Error::Bus(e.to_string())
    }
}

/// Result type for Linux I2C operations
pub type Result<T> = std::result::Result<T, LinuxI2cError>;
