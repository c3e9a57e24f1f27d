//! OBP_RAW configuration text format
//!
//! ```text
//! OBP_RAW V1
//! 81 01 10 AA 10 0E 06        <- info block echo (7 bytes)
//! 5A3C21                      <- info block CRC24
//! 0F1E2D                      <- config CRC24
//! 0007 0000 0004 20 FF 32 03  <- type instance size bytes...
//! ```
//!
//! All fields are hexadecimal and separated by arbitrary whitespace.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::info;

/// First token of every configuration file
pub const MAGIC: &str = "OBP_RAW V1";

/// Contents of one object instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    /// Object type
    pub object_type: u8,
    /// Instance number
    pub instance: u16,
    /// Object bytes as stored in the file
    pub data: Vec<u8>,
}

/// A parsed configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConfig {
    /// ID header of the device the file was saved from
    pub info: [u8; info::HEADER_SIZE],
    /// Info block checksum of that device
    pub info_crc: u32,
    /// Checksum of the configuration
    pub config_crc: u32,
    /// Object records in file order
    pub records: Vec<ConfigRecord>,
}

impl RawConfig {
    /// Family id of the device the file targets
    pub fn family_id(&self) -> u8 {
        self.info[0]
    }

    /// Variant id of the device the file targets
    pub fn variant_id(&self) -> u8 {
        self.info[1]
    }

    /// Parse a configuration file
    ///
    /// The whole file is validated before anything is returned, so a
    /// malformed record never results in a partial apply.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .strip_prefix(MAGIC)
            .ok_or_else(|| Error::format("unrecognised config file"))?;
        let mut tokens = Tokens::new(body);

        let mut info = [0u8; info::HEADER_SIZE];
        for (i, byte) in info.iter_mut().enumerate() {
            *byte = tokens.byte(|| format!("info block byte {}", i))?;
        }

        let info_crc = tokens.crc("info CRC")?;
        let config_crc = tokens.crc("config CRC")?;

        let mut records = Vec::new();
        while let Some(first) = tokens.next_token() {
            let object_type = u8::try_from(parse_hex(first, "object type")?)
                .map_err(|_| Error::format(format!("object type {} out of range", first)))?;
            let instance = tokens.word(|| format!("T{} instance", object_type))?;
            let size = tokens.word(|| format!("T{} size", object_type))?;

            let mut data = Vec::with_capacity(size as usize);
            for i in 0..size {
                data.push(tokens.byte(|| format!("T{} byte {}", object_type, i))?);
            }

            records.push(ConfigRecord {
                object_type,
                instance,
                data,
            });
        }

        Ok(Self {
            info,
            info_crc,
            config_crc,
            records,
        })
    }
}

impl fmt::Display for RawConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", MAGIC)?;
        let info: Vec<String> = self.info.iter().map(|b| format!("{:02X}", b)).collect();
        writeln!(f, "{}", info.join(" "))?;
        writeln!(f, "{:06X}", self.info_crc)?;
        writeln!(f, "{:06X}", self.config_crc)?;
        for record in &self.records {
            write!(
                f,
                "{:04X} {:04X} {:04X}",
                record.object_type,
                record.instance,
                record.data.len()
            )?;
            for b in &record.data {
                write!(f, " {:02X}", b)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.inner.next()
    }

    fn field(&mut self, what: &dyn Fn() -> String) -> Result<u32> {
        let token = self
            .inner
            .next()
            .ok_or_else(|| Error::format(format!("truncated: missing {}", what())))?;
        parse_hex(token, &what())
    }

    fn byte(&mut self, what: impl Fn() -> String) -> Result<u8> {
        let value = self.field(&what)?;
        u8::try_from(value).map_err(|_| Error::format(format!("{}: 0x{:X} is not a byte", what(), value)))
    }

    fn word(&mut self, what: impl Fn() -> String) -> Result<u16> {
        let value = self.field(&what)?;
        u16::try_from(value).map_err(|_| Error::format(format!("{}: 0x{:X} out of range", what(), value)))
    }

    fn crc(&mut self, what: &'static str) -> Result<u32> {
        let value = self.field(&|| what.to_string())?;
        if value > 0x00FF_FFFF {
            return Err(Error::format(format!("{}: 0x{:X} exceeds 24 bits", what, value)));
        }
        Ok(value)
    }
}

fn parse_hex(token: &str, what: &str) -> Result<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16)
        .map_err(|_| Error::format(format!("{}: invalid hex value '{}'", what, token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "OBP_RAW V1
81 01 10 AA 10 0E 06
5A3C21
0F1E2D
0007 0000 0004 20 FF 32 03
0009 0001 0002
  01 02
";

    #[test]
    fn test_parse_sample() {
        let cfg = RawConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.info, [0x81, 0x01, 0x10, 0xAA, 0x10, 0x0E, 0x06]);
        assert_eq!(cfg.family_id(), 0x81);
        assert_eq!(cfg.variant_id(), 0x01);
        assert_eq!(cfg.info_crc, 0x5A3C21);
        assert_eq!(cfg.config_crc, 0x0F1E2D);
        assert_eq!(cfg.records.len(), 2);
        assert_eq!(cfg.records[0].object_type, 7);
        assert_eq!(cfg.records[0].data, vec![0x20, 0xFF, 0x32, 0x03]);
        assert_eq!(cfg.records[1].instance, 1);
        assert_eq!(cfg.records[1].data, vec![0x01, 0x02]);
    }

    #[test]
    fn test_display_reparses() {
        let cfg = RawConfig::parse(SAMPLE).unwrap();
        let text = cfg.to_string();
        assert!(text.starts_with("OBP_RAW V1\n81 01 10 AA 10 0E 06\n5A3C21\n"));
        assert_eq!(RawConfig::parse(&text).unwrap(), cfg);
    }

    #[test]
    fn test_bad_magic() {
        let err = RawConfig::parse("OBP_RAW V2\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_truncated_record() {
        let text = "OBP_RAW V1 81 01 10 AA 10 0E 06 0 0 0007 0000 0004 20 FF";
        let err = RawConfig::parse(text).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
        assert!(err.to_string().contains("T7"));
    }

    #[test]
    fn test_bad_hex() {
        let text = "OBP_RAW V1 81 01 10 AA 10 0E 06 0 0 0007 0000 0001 ZZ";
        assert!(RawConfig::parse(text).is_err());
        let text = "OBP_RAW V1 81 01 10 AA 10 0E 06 0 0 0007 0000 0001 100";
        assert!(RawConfig::parse(text).is_err());
    }

    #[test]
    fn test_no_records() {
        let cfg = RawConfig::parse("OBP_RAW V1 81 01 10 AA 10 0E 06 0 0").unwrap();
        assert!(cfg.records.is_empty());
        assert_eq!(cfg.config_crc, 0);
    }
}
