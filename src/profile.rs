//! Device profile files
//!
//! A profile names the bus and overrides engine policy knobs:
//!
//! ```toml
//! bus = "linux_i2c:dev=/dev/i2c-1,addr=0x4a,gpiochip=0,chg=17"
//!
//! [engine]
//! resync = true
//! resync_attempts = 260
//! crc_error_threshold = 3
//! comm_error_threshold = 5
//! reset_timeout_ms = 3000
//! crc_timeout_ms = 1000
//! bootloader_timeout_ms = 300
//! max_block_write = "0x100"
//! frame_retries = 20
//! ```

use mxt_core::EngineConfig;
use std::fs;
use std::path::Path;

/// Profile file structure
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Bus connection string
    pub bus: Option<String>,
    #[serde(default)]
    engine: EngineOverrides,
}

/// Engine knobs, each optional
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineOverrides {
    resync: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    resync_attempts: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    crc_error_threshold: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    comm_error_threshold: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    reset_timeout_ms: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    crc_timeout_ms: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    bootloader_timeout_ms: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    max_block_write: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    frame_retries: Option<u32>,
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_opt_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(Some(n)),
        HexOrInt::Str(s) => parse_number(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

fn threshold(name: &str, value: u32) -> Result<u8, String> {
    u8::try_from(value).map_err(|_| format!("{} must be at most 255, got {}", name, value))
}

impl Profile {
    /// Load a profile from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read profile {}: {}", path.display(), e))?;
        Ok(Self::from_toml_str(&content)?)
    }

    /// Parse a profile from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Invalid profile: {}", e))
    }

    /// Engine configuration with this profile's overrides applied
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        let e = &self.engine;
        let mut config = EngineConfig::new();
        if let Some(enabled) = e.resync {
            config = config.with_resync(enabled);
        }
        if let Some(n) = e.resync_attempts {
            config = config.with_resync_attempts(n);
        }
        if let Some(n) = e.crc_error_threshold {
            config = config.with_crc_error_threshold(threshold("crc_error_threshold", n)?);
        }
        if let Some(n) = e.comm_error_threshold {
            config = config.with_comm_error_threshold(threshold("comm_error_threshold", n)?);
        }
        if let Some(ms) = e.reset_timeout_ms {
            config = config.with_reset_timeout(ms);
        }
        if let Some(ms) = e.crc_timeout_ms {
            config = config.with_crc_timeout(ms);
        }
        if let Some(ms) = e.bootloader_timeout_ms {
            config = config.with_bootloader_timeout(ms);
        }
        if let Some(n) = e.max_block_write {
            config = config.with_max_block_write(n as usize);
        }
        if let Some(n) = e.frame_retries {
            config = config.with_frame_retries(n);
        }
        Ok(config)
    }
}
