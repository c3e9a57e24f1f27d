//! Linux I2C device implementation
//!
//! This module provides the `LinuxI2c` struct that implements the `I2cBus`
//! trait using Linux's i2c-dev interface and combined `I2C_RDWR` transfers.

use crate::chg::ChgLine;
use crate::error::{LinuxI2cError, Result};

use mxt_core::bus::{I2cBus, CHG_POLL_MS};
use mxt_core::error::Result as CoreResult;

use gpiocdev::line::Offset;

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Default application address of a maXTouch controller
pub const DEFAULT_ADDRESS: u8 = 0x4a;

/// Linux i2c-dev ioctl constants
mod ioctl {
    use nix::{ioctl_read_bad, ioctl_write_ptr_bad};

    /// Query adapter functionality
    const I2C_FUNCS: u16 = 0x0705;
    /// Combined read/write transfer
    const I2C_RDWR: u16 = 0x0707;

    /// Adapter supports plain I2C-level commands
    pub const I2C_FUNC_I2C: libc::c_ulong = 0x0000_0001;

    /// Message is a read
    pub const I2C_M_RD: u16 = 0x0001;

    /// Kernel `struct i2c_msg`
    #[repr(C)]
    #[derive(Debug)]
    pub struct I2cMsg {
        pub addr: u16,
        pub flags: u16,
        pub len: u16,
        pub buf: *mut u8,
    }

    /// Kernel `struct i2c_rdwr_ioctl_data`
    #[repr(C)]
    #[derive(Debug)]
    pub struct I2cRdwrData {
        pub msgs: *mut I2cMsg,
        pub nmsgs: u32,
    }

    ioctl_read_bad!(i2c_funcs, I2C_FUNCS, libc::c_ulong);
    ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrData);
}

use ioctl::I2cMsg;

/// Configuration for opening a Linux I2C device
#[derive(Debug, Clone)]
pub struct LinuxI2cConfig {
    /// Device path (e.g., "/dev/i2c-1")
    pub device: String,
    /// Application address of the controller
    pub address: u8,
    /// GPIO chip carrying the CHG line (e.g., "/dev/gpiochip0")
    pub chip: Option<String>,
    /// CHG line offset on `chip`
    pub chg: Option<Offset>,
}

impl Default for LinuxI2cConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            address: DEFAULT_ADDRESS,
            chip: None,
            chg: None,
        }
    }
}

impl LinuxI2cConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the controller's application address
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Use a GPIO line as the CHG input
    pub fn with_chg(mut self, chip: impl Into<String>, offset: Offset) -> Self {
        self.chip = Some(chip.into());
        self.chg = Some(offset);
        self
    }
}

/// Linux I2C bus using the i2c-dev interface
///
/// Without a CHG line, waits fall back to paced polling and the engine
/// finds out whether messages are pending by reading them.
pub struct LinuxI2c {
    file: File,
    device: String,
    address: u8,
    chg: Option<ChgLine>,
}

impl LinuxI2c {
    /// Open a Linux I2C device with the given configuration
    pub fn open(config: &LinuxI2cConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxI2cError::NoDevice);
        }

        log::debug!("linux_i2c: Opening device {}", config.device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxI2cError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let mut funcs: libc::c_ulong = 0;
        unsafe {
            ioctl::i2c_funcs(file.as_raw_fd(), &mut funcs).map_err(|e| {
                LinuxI2cError::FuncsFailed {
                    path: config.device.clone(),
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }
        if funcs & ioctl::I2C_FUNC_I2C == 0 {
            return Err(LinuxI2cError::NoI2cSupport(config.device.clone()));
        }

        let chg = match (&config.chip, config.chg) {
            (Some(chip), Some(offset)) => Some(ChgLine::open(chip, offset)?),
            _ => None,
        };

        log::info!(
            "linux_i2c: Opened {} (addr=0x{:02x}{})",
            config.device,
            config.address,
            match (&config.chip, config.chg) {
                (Some(chip), Some(offset)) => format!(", chg={}:{}", chip, offset),
                _ => String::new(),
            }
        );

        Ok(Self {
            file,
            device: config.device.clone(),
            address: config.address,
            chg,
        })
    }

    /// Open a device with default settings
    pub fn open_device(device: &str) -> Result<Self> {
        Self::open(&LinuxI2cConfig::new(device))
    }

    /// Device path this bus was opened from
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Application address from the configuration
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Whether a CHG line is attached
    pub fn has_chg(&self) -> bool {
        self.chg.is_some()
    }

    /// Run one `I2C_RDWR` transaction
    fn transfer(&mut self, addr: u8, msgs: &mut [I2cMsg]) -> Result<()> {
        let data = ioctl::I2cRdwrData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };

        log::trace!("linux_i2c: transfer addr=0x{:02x} msgs={}", addr, msgs.len());

        unsafe {
            ioctl::i2c_rdwr(self.file.as_raw_fd(), &data).map_err(|e| {
                LinuxI2cError::TransferFailed {
                    addr,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }
        Ok(())
    }
}

fn write_msg(addr: u8, data: &[u8]) -> Result<I2cMsg> {
    let len = u16::try_from(data.len()).map_err(|_| LinuxI2cError::TransferTooLong(data.len()))?;
    Ok(I2cMsg {
        addr: addr as u16,
        flags: 0,
        len,
        // The kernel only reads from a write buffer.
        buf: data.as_ptr() as *mut u8,
    })
}

fn read_msg(addr: u8, buf: &mut [u8]) -> Result<I2cMsg> {
    let len = u16::try_from(buf.len()).map_err(|_| LinuxI2cError::TransferTooLong(buf.len()))?;
    Ok(I2cMsg {
        addr: addr as u16,
        flags: ioctl::I2C_M_RD,
        len,
        buf: buf.as_mut_ptr(),
    })
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, addr: u8, data: &[u8]) -> CoreResult<()> {
        let mut msgs = [write_msg(addr, data)?];
        self.transfer(addr, &mut msgs)?;
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> CoreResult<()> {
        let mut msgs = [read_msg(addr, buf)?];
        self.transfer(addr, &mut msgs)?;
        Ok(())
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> CoreResult<()> {
        let mut msgs = [write_msg(addr, data)?, read_msg(addr, buf)?];
        self.transfer(addr, &mut msgs)?;
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }

    fn wait_chg(&mut self, timeout_ms: u32) -> CoreResult<bool> {
        match &self.chg {
            Some(chg) => Ok(chg.wait_asserted(Duration::from_millis(timeout_ms as u64))?),
            None => {
                self.delay_ms(timeout_ms.min(CHG_POLL_MS));
                Ok(true)
            }
        }
    }
}

/// Parse options from the bus connection string
///
/// Recognised keys:
/// - `dev=/dev/i2c-1` or `bus=1`: adapter
/// - `addr=0x4a`: controller application address
/// - `chip=/dev/gpiochip0` or `gpiochip=0`: GPIO chip carrying CHG
/// - `chg=17`: CHG line offset
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<LinuxI2cConfig, String> {
    let mut config = LinuxI2cConfig::default();
    let mut bus: Option<u32> = None;
    let mut chip: Option<String> = None;
    let mut chg: Option<Offset> = None;

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "bus" => {
                bus = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid bus value: {}", value))?,
                );
            }
            "addr" => {
                let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
                    Some(hex) => u8::from_str_radix(hex, 16),
                    None => value.parse(),
                };
                let addr = parsed.map_err(|_| format!("Invalid addr value: {}", value))?;
                if addr > 0x7f {
                    return Err(format!("addr must be a 7-bit address, got {}", value));
                }
                config.address = addr;
            }
            "chip" => {
                chip = Some(value.to_string());
            }
            "gpiochip" => {
                let n: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid gpiochip value: {}", value))?;
                chip = Some(format!("/dev/gpiochip{}", n));
            }
            "chg" => {
                chg = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid chg value: {}", value))?,
                );
            }
            _ => {
                log::warn!("linux_i2c: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        match bus {
            Some(n) => config.device = format!("/dev/i2c-{}", n),
            None => {
                return Err("Either 'dev' or 'bus' must be specified.\n\
                     e.g. linux_i2c:dev=/dev/i2c-1,addr=0x4a"
                    .to_string())
            }
        }
    } else if bus.is_some() {
        return Err("Only one of 'dev' or 'bus' can be specified".to_string());
    }

    match (chip, chg) {
        (Some(chip), Some(offset)) => config = config.with_chg(chip, offset),
        (None, None) => {}
        (None, Some(_)) => return Err("'chg' needs 'chip' or 'gpiochip'".to_string()),
        (Some(_), None) => return Err("'chip' given without a 'chg' line".to_string()),
    }

    Ok(config)
}
