//! Error types for mxt-core

use thiserror::Error;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport level I/O failure
    Bus,
    /// Framing or checksum mismatch
    Crc,
    /// Malformed directory, invalid state transition or lost sync
    Protocol,
    /// A bounded wait expired
    Timeout,
    /// Malformed configuration or firmware file
    Format,
    /// File does not match the connected device
    Compatibility,
    /// A required object is not present in the directory
    NotFound,
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport level I/O failure
    #[error("bus error: {0}")]
    Bus(String),

    /// Framing or checksum mismatch
    #[error("CRC error: {0}")]
    Crc(String),

    /// Protocol violation or unrecoverable loss of sync
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait expired
    #[error("timed out after {timeout_ms} ms waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: &'static str,
        /// The timeout that expired
        timeout_ms: u32,
    },

    /// Malformed configuration or firmware file
    #[error("format error: {0}")]
    Format(String),

    /// File does not match the connected device
    #[error("compatibility error: {0}")]
    Compatibility(String),

    /// A required object is not present in the directory
    #[error("object T{0} not present on device")]
    NotFound(u8),
}

impl Error {
    /// Get the broad kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bus(_) => ErrorKind::Bus,
            Self::Crc(_) => ErrorKind::Crc,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Format(_) => ErrorKind::Format,
            Self::Compatibility(_) => ErrorKind::Compatibility,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::Bus("nack".into()).kind(), ErrorKind::Bus);
        assert_eq!(
            Error::Timeout {
                what: "reset",
                timeout_ms: 3000
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::NotFound(7).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            what: "config checksum",
            timeout_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 1000 ms waiting for config checksum"
        );
        assert_eq!(
            Error::NotFound(144).to_string(),
            "object T144 not present on device"
        );
    }
}
