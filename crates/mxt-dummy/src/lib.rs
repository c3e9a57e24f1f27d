//! mxt-dummy - Emulated maXTouch controller for testing
//!
//! This crate provides an in-memory maXTouch controller behind the
//! [`I2cBus`] trait. It serves an info block and object memory, speaks
//! both the plain and the CRC8-framed wire formats, runs the T6 command
//! processor, queues messages, and emulates the bootloader. Faults can be
//! injected to exercise the recovery paths of the engine without hardware.
//!
//! Time is virtual: [`I2cBus::delay_ms`] and [`I2cBus::wait_chg`] advance a
//! clock instead of sleeping.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bootloader;
#[cfg(test)]
mod scenarios;

use std::collections::VecDeque;

pub use bootloader::{BOOTLOADER_ID, BOOTLOADER_VERSION};

use bootloader::{Action, EmulatedBootloader};
use mxt_core::bus::I2cBus;
use mxt_core::crc::{crc24, crc8};
use mxt_core::directory::{encode_info_block, Directory, InfoBlock, ObjectEntry};
use mxt_core::error::{Error, Result};
use mxt_core::protocol::{command, info, object, T6Status};

/// Description of an emulated controller
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// ID header; the object count is filled in from `objects`
    pub info: InfoBlock,
    /// Application address
    pub address: u8,
    /// Object table
    pub objects: Vec<ObjectEntry>,
    /// Bootloader reports an extended id
    pub extended_bootloader_id: bool,
}

/// Object types, sizes, instances and report ids of a profile, in table order
type Layout = &'static [(u8, usize, usize, u8)];

#[rustfmt::skip]
const PLAIN_LAYOUT: Layout = &[
    (object::SPT_MESSAGECOUNT_T44,            1, 1, 0),
    (object::GEN_MESSAGE_T5,                 10, 1, 0),
    (object::GEN_COMMAND_T6,                  6, 1, 1),
    (object::GEN_POWER_T7,                    4, 1, 0),
    (object::GEN_ACQUIRE_T8,                 10, 1, 0),
    (object::TOUCH_MULTI_T9,                 36, 1, 10),
    (object::TOUCH_KEYARRAY_T15,             11, 1, 1),
    (object::SPT_COMMSCONFIG_T18,             2, 1, 0),
    (object::SPT_GPIOPWM_T19,                16, 1, 1),
    (object::PROCI_TOUCHSUPPRESSION_T42,      8, 1, 1),
    (object::PROCG_NOISESUPPRESSION_T48,     20, 1, 1),
    (object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 16, 1, 0),
];

#[rustfmt::skip]
const CRC_LAYOUT: Layout = &[
    (object::SPT_MESSAGECOUNT_T144,           2, 1, 0),
    (object::GEN_MESSAGE_T5,                 10, 1, 0),
    (object::GEN_COMMAND_T6,                  6, 1, 1),
    (object::GEN_POWER_T7,                    4, 1, 0),
    (object::GEN_ACQUIRE_T8,                 10, 1, 0),
    (object::SPT_COMMSCONFIG_T18,             2, 1, 0),
    (object::TOUCH_MULTITOUCHSCREEN_T100,    24, 1, 12),
    (object::PROCI_SYMBOLGESTUREPROCESSOR_T92, 8, 1, 1),
];

/// Lay out objects back to back after the info block
pub fn layout(types: &[(u8, usize, usize, u8)]) -> Vec<ObjectEntry> {
    let mut address = info::HEADER_SIZE + types.len() * info::OBJECT_ENTRY_SIZE + info::CHECKSUM_SIZE;
    types
        .iter()
        .map(|&(object_type, size, instances, report_ids)| {
            let entry = ObjectEntry::new(object_type, address as u16, size, instances, report_ids);
            address += size * instances;
            entry
        })
        .collect()
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self::plain()
    }
}

impl DummyConfig {
    /// A plain-framed controller with T44 and T9
    pub fn plain() -> Self {
        Self {
            info: InfoBlock {
                family_id: 0x81,
                variant_id: 0x01,
                version: 0x20,
                build: 0xAA,
                matrix_x: 16,
                matrix_y: 14,
                object_count: 0,
            },
            address: 0x4a,
            objects: layout(PLAIN_LAYOUT),
            extended_bootloader_id: false,
        }
    }

    /// A CRC-framed controller with T144 and T100
    pub fn crc() -> Self {
        Self {
            info: InfoBlock {
                family_id: 0xA6,
                variant_id: 0x14,
                version: 0x10,
                build: 0xAB,
                matrix_x: 24,
                matrix_y: 40,
                object_count: 0,
            },
            address: 0x4a,
            objects: layout(CRC_LAYOUT),
            extended_bootloader_id: true,
        }
    }

    /// Set the family id
    pub fn with_family(mut self, family_id: u8) -> Self {
        self.info.family_id = family_id;
        self
    }

    /// Set the variant id
    pub fn with_variant(mut self, variant_id: u8) -> Self {
        self.info.variant_id = variant_id;
        self
    }

    /// Set the application address
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Encoded info block
    pub fn info_block(&self) -> Vec<u8> {
        encode_info_block(&self.info, &self.objects)
    }
}

/// Parse connection options for the dummy bus
///
/// Recognised keys: `profile` (`plain` or `crc`), `family`, `variant`, `addr`.
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<DummyConfig, String> {
    let mut config = DummyConfig::plain();
    for &(key, value) in options {
        if key == "profile" {
            config = match value {
                "plain" => DummyConfig::plain(),
                "crc" => DummyConfig::crc(),
                _ => return Err(format!("Unknown dummy profile '{}'. Use plain or crc", value)),
            };
        }
    }
    for &(key, value) in options {
        match key {
            "profile" => {}
            "family" => config = config.with_family(parse_u8(key, value)?),
            "variant" => config = config.with_variant(parse_u8(key, value)?),
            "addr" => config = config.with_address(parse_u8(key, value)?),
            _ => return Err(format!("Unknown dummy option '{}'", key)),
        }
    }
    Ok(config)
}

/// Create an emulated controller and return it boxed, with its address
///
/// This is a convenience function for use in the CLI bus dispatch.
pub fn open_dummy(
    options: &[(&str, &str)],
) -> std::result::Result<(Box<dyn I2cBus + Send>, u8), Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    let address = config.address;
    log::info!(
        "dummy: Emulating family 0x{:02X} variant 0x{:02X} at 0x{:02x}",
        config.info.family_id,
        config.info.variant_id,
        address
    );
    Ok((Box::new(DummyController::new(config)?), address))
}

fn parse_u8(key: &str, value: &str) -> std::result::Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("Invalid {} value '{}'", key, value))
}

/// Bus activity seen by the emulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Writes that carried register data
    pub data_writes: usize,
    /// CRC frames received, including header-only frames
    pub crc_frames: usize,
    /// Frames rejected for a bad CRC or sequence number
    pub comm_errors: usize,
    /// Application resets
    pub resets: usize,
    /// Configuration backups
    pub backups: usize,
    /// Calibrations
    pub calibrations: usize,
    /// Transfers failed by fault injection
    pub injected_bus_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Application,
    Bootloader,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    bus_errors: u32,
    corrupt_table_reads: u32,
    corrupt_message_reads: u32,
}

/// Emulated maXTouch controller
pub struct DummyController {
    config: DummyConfig,
    directory: Directory,
    mem: Vec<u8>,
    nv: Vec<u8>,
    pointer: u16,
    rx_seq: u8,
    crc_framed: bool,
    queue: VecDeque<Vec<u8>>,
    status: T6Status,
    dynamic_stopped: bool,
    mode: Mode,
    app_valid: bool,
    bootloader: EmulatedBootloader,
    bootloader_address: Option<u8>,
    faults: Faults,
    counters: Counters,
    clock_ms: u64,
}

impl DummyController {
    /// Create a powered-up controller
    pub fn new(config: DummyConfig) -> Result<Self> {
        let raw = config.info_block();
        let directory = Directory::parse(&raw)?;
        let mut mem = vec![0u8; directory.mem_size()];
        mem[..raw.len()].copy_from_slice(&raw);
        let bootloader_address = mxt_core::bootloader::bootloader_address(
            config.address,
            config.info.family_id,
            false,
        )
        .ok();

        let mut ctl = Self {
            crc_framed: directory.is_crc_framed(),
            bootloader: EmulatedBootloader::new(config.extended_bootloader_id),
            nv: mem.clone(),
            config,
            directory,
            mem,
            pointer: 0,
            rx_seq: 0,
            queue: VecDeque::new(),
            status: T6Status::empty(),
            dynamic_stopped: false,
            mode: Mode::Application,
            app_valid: true,
            bootloader_address,
            faults: Faults::default(),
            counters: Counters::default(),
            clock_ms: 0,
        };
        ctl.power_on();
        Ok(ctl)
    }

    /// Create a controller whose application does not start
    pub fn in_bootloader(config: DummyConfig) -> Result<Self> {
        let mut ctl = Self::new(config)?;
        ctl.app_valid = false;
        ctl.enter_bootloader();
        Ok(ctl)
    }

    /// Emulator description
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Directory of the emulated device
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Object memory, info block included
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    /// Contents of one object instance
    pub fn object(&self, object_type: u8, instance: usize) -> Option<&[u8]> {
        let obj = self.directory.get(object_type)?;
        let start = obj.address_of(instance) as usize;
        self.mem.get(start..start + obj.size())
    }

    /// Overwrite object memory without going through the bus
    pub fn set_object(&mut self, object_type: u8, instance: usize, data: &[u8]) {
        if let Some(obj) = self.directory.get(object_type) {
            let start = obj.address_of(instance) as usize;
            let len = data.len().min(obj.size());
            self.mem[start..start + len].copy_from_slice(&data[..len]);
        }
    }

    /// Bus activity so far
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Virtual time elapsed
    pub fn elapsed_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Whether the bootloader is active
    pub fn is_in_bootloader(&self) -> bool {
        self.mode == Mode::Bootloader
    }

    /// Bootloader address of this device
    pub fn bootloader_address(&self) -> Option<u8> {
        self.bootloader_address
    }

    /// Frames the bootloader accepted, in order
    pub fn received_frames(&self) -> &[Vec<u8>] {
        &self.bootloader.frames
    }

    /// Frames the bootloader rejected, in the order they arrived
    pub fn rejected_frames(&self) -> &[Vec<u8>] {
        &self.bootloader.rejected
    }

    /// Whether dynamic configuration was stopped by a backup request
    pub fn dynamic_config_stopped(&self) -> bool {
        self.dynamic_stopped
    }

    /// Sequence number the device expects next
    pub fn expected_seq(&self) -> u8 {
        self.rx_seq
    }

    /// Config checksum the device reports
    pub fn config_crc(&self) -> u32 {
        match mxt_core::config::crc_start(&self.directory) {
            Some(start) => crc24(&self.mem[start as usize..self.directory.mem_size()]),
            None => 0,
        }
    }

    /// Number of queued messages
    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }

    /// Queue a raw message record (report id first)
    pub fn push_message(&mut self, record: &[u8]) {
        self.queue.push_back(record.to_vec());
    }

    /// Queue a touch on the device's touch object
    pub fn push_touch(&mut self, id: u8, x: u16, y: u16) {
        if let Some(range) = self.directory.report_range(object::TOUCH_MULTI_T9) {
            let lsb = ((x & 0x0F) << 4) as u8 | (y & 0x0F) as u8;
            self.push_message(&[
                range.min + id,
                0xC0,
                (x >> 4) as u8,
                (y >> 4) as u8,
                lsb,
                5,
                30,
            ]);
        } else if let Some(range) = self.directory.report_range(object::TOUCH_MULTITOUCHSCREEN_T100) {
            let [xl, xh] = x.to_le_bytes();
            let [yl, yh] = y.to_le_bytes();
            self.push_message(&[range.min + 2 + id, 0x90, xl, xh, yl, yh]);
        }
    }

    /// Fail the next `count` transfers with a bus error
    pub fn fail_transfers(&mut self, count: u32) {
        self.faults.bus_errors = count;
    }

    /// Corrupt the next `count` reads of the object table
    pub fn corrupt_table_reads(&mut self, count: u32) {
        self.faults.corrupt_table_reads = count;
    }

    /// Send a bad CRC on the next `count` message object reads
    pub fn corrupt_message_reads(&mut self, count: u32) {
        self.faults.corrupt_message_reads = count;
    }

    /// Queue `count` status messages reporting a communication error
    pub fn inject_comserr(&mut self, count: usize) {
        for _ in 0..count {
            self.push_status(T6Status::COMSERR);
        }
    }

    /// Reject the next `count` firmware frames
    pub fn fail_frames(&mut self, count: u32) {
        self.bootloader.fail_frames = count;
    }

    fn t6_report_id(&self) -> Option<u8> {
        self.directory
            .report_range(object::GEN_COMMAND_T6)
            .map(|r| r.min)
    }

    fn push_status(&mut self, status: T6Status) {
        if let Some(rid) = self.t6_report_id() {
            let crc = self.config_crc().to_le_bytes();
            self.queue
                .push_back(vec![rid, status.bits(), crc[0], crc[1], crc[2]]);
        }
    }

    fn power_on(&mut self) {
        let start = self.directory.config_start();
        let end = self.directory.mem_size();
        self.mem[start..end].copy_from_slice(&self.nv[start..end]);
        self.queue.clear();
        self.rx_seq = 0;
        self.pointer = 0;
        self.dynamic_stopped = false;
        self.mode = Mode::Application;
        self.counters.resets += 1;
        self.push_status(T6Status::RESET);
    }

    fn enter_bootloader(&mut self) {
        log::debug!("dummy: entering bootloader");
        self.mode = Mode::Bootloader;
        self.queue.clear();
        self.bootloader.enter();
    }

    fn take_bus_error(&mut self) -> Result<()> {
        if self.faults.bus_errors > 0 {
            self.faults.bus_errors -= 1;
            self.counters.injected_bus_errors += 1;
            return Err(Error::Bus("dummy: injected transfer failure".into()));
        }
        Ok(())
    }

    /// Route a transfer to the application or the bootloader
    fn target(&mut self, addr: u8) -> Result<Mode> {
        if addr == self.config.address {
            if self.mode == Mode::Bootloader && self.bootloader.has_frames() && self.bootloader.idle() {
                log::debug!("dummy: firmware loaded, starting application");
                self.app_valid = true;
                self.power_on();
            }
            if self.mode == Mode::Application {
                return Ok(Mode::Application);
            }
        } else if Some(addr) == self.bootloader_address && self.mode == Mode::Bootloader {
            return Ok(Mode::Bootloader);
        }
        Err(Error::Bus(format!("dummy: no ACK from 0x{:02x}", addr)))
    }

    fn message_address(&self) -> Option<u16> {
        self.directory.address(object::GEN_MESSAGE_T5)
    }

    fn pop_record(&mut self, len: usize) -> Vec<u8> {
        let mut record = self
            .queue
            .pop_front()
            .unwrap_or_else(|| vec![mxt_core::protocol::report_id::NO_MESSAGE]);
        record.resize(len, 0);
        record
    }

    fn app_read(&mut self, buf: &mut [u8]) -> Result<()> {
        let reg = self.pointer;
        let count_addr = self.directory.message_count_address();

        if Some(reg) == count_addr && self.crc_framed {
            buf.fill(0);
            buf[0] = self.queue.len() as u8;
            if buf.len() >= 2 {
                buf[1] = crc8(&buf[..1]);
            }
            return Ok(());
        }

        if Some(reg) == count_addr {
            buf[0] = self.queue.len() as u8;
            if buf.len() > 1 {
                let record = self.pop_record(buf.len() - 1);
                buf[1..].copy_from_slice(&record);
            }
            return Ok(());
        }

        if Some(reg) == self.message_address() {
            if self.crc_framed && !buf.is_empty() {
                let len = buf.len();
                let mut record = self.pop_record(len - 1);
                let mut crc = crc8(&record);
                if self.faults.corrupt_message_reads > 0 {
                    self.faults.corrupt_message_reads -= 1;
                    crc ^= 0xFF;
                }
                record.push(crc);
                buf.copy_from_slice(&record);
            } else {
                let record = self.pop_record(buf.len());
                buf.copy_from_slice(&record);
            }
            return Ok(());
        }

        let start = reg as usize;
        let end = start + buf.len();
        if end > self.mem.len() {
            return Err(Error::Bus(format!(
                "dummy: read of {} bytes at 0x{:04X} beyond memory",
                buf.len(),
                reg
            )));
        }
        buf.copy_from_slice(&self.mem[start..end]);

        if reg == info::OBJECT_START && self.faults.corrupt_table_reads > 0 {
            self.faults.corrupt_table_reads -= 1;
            buf[0] ^= 0x01;
        }
        Ok(())
    }

    fn app_write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 2 {
            return Err(Error::Bus("dummy: write shorter than an address".into()));
        }

        // The pointer can always be set without framing
        if data.len() == 2 {
            self.pointer = u16::from_le_bytes([data[0], data[1]]);
            return Ok(());
        }

        if !self.crc_framed {
            self.pointer = u16::from_le_bytes([data[0], data[1]]);
            return self.store(self.pointer, &data[2..]);
        }

        self.counters.crc_frames += 1;
        let (body, trailer) = data.split_at(data.len() - 1);
        if body.len() < 3 || crc8(body) != trailer[0] {
            return self.comm_error("bad frame CRC");
        }

        let reg = u16::from_le_bytes([body[0], body[1]]);
        let seq = body[2];
        let payload = &body[3..];

        // A header at sequence 0 restarts the sequence
        if seq != self.rx_seq && !(seq == 0 && payload.is_empty()) {
            return self.comm_error("unexpected sequence number");
        }
        self.rx_seq = seq.wrapping_add(1);
        self.pointer = reg;
        if payload.is_empty() {
            return Ok(());
        }
        self.store(reg, payload)
    }

    fn comm_error(&mut self, why: &str) -> Result<()> {
        log::debug!("dummy: {} (expected seq {})", why, self.rx_seq);
        self.counters.comm_errors += 1;
        self.push_status(T6Status::COMSERR);
        Ok(())
    }

    fn store(&mut self, reg: u16, payload: &[u8]) -> Result<()> {
        let start = reg as usize;
        let end = start + payload.len();
        if end > self.mem.len() {
            return Err(Error::Bus(format!(
                "dummy: write of {} bytes at 0x{:04X} beyond memory",
                payload.len(),
                reg
            )));
        }
        if start < self.directory.config_start() {
            log::warn!("dummy: ignoring write into the info block at 0x{:04X}", reg);
            return Ok(());
        }

        self.counters.data_writes += 1;
        self.mem[start..end].copy_from_slice(payload);

        if let Some(t6) = self.directory.get(object::GEN_COMMAND_T6) {
            let t6_start = t6.start_address as usize;
            for offset in start.max(t6_start)..end.min(t6_start + t6.size()) {
                // Command registers clear once the command is accepted
                let value = std::mem::take(&mut self.mem[offset]);
                self.run_command((offset - t6_start) as u16, value);
            }
        }
        Ok(())
    }

    fn run_command(&mut self, offset: u16, value: u8) {
        if value == 0 {
            return;
        }
        match offset {
            command::RESET if value == command::BOOT_VALUE => self.enter_bootloader(),
            command::RESET => {
                log::debug!("dummy: reset");
                self.power_on();
            }
            command::BACKUPNV if value == command::BACKUP_VALUE => {
                log::debug!("dummy: backup");
                self.nv.copy_from_slice(&self.mem);
                self.counters.backups += 1;
                self.push_status(T6Status::empty());
            }
            command::BACKUPNV if value == command::BACKUP_STOP_DYNAMIC => {
                self.dynamic_stopped = true;
            }
            command::CALIBRATE => {
                self.counters.calibrations += 1;
                self.push_status(T6Status::CAL);
                self.push_status(T6Status::empty());
            }
            command::REPORTALL => self.push_status(self.status),
            _ => log::debug!("dummy: ignoring T6 command {} = 0x{:02X}", offset, value),
        }
    }

    fn boot_write(&mut self, data: &[u8]) {
        if self.bootloader.write(data) == Action::Exit {
            if self.app_valid {
                log::debug!("dummy: bootloader exit");
                self.power_on();
            } else {
                log::debug!("dummy: bootloader exit ignored, no valid application");
            }
        }
    }
}

impl I2cBus for DummyController {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        self.take_bus_error()?;
        match self.target(addr)? {
            Mode::Application => self.app_write(data),
            Mode::Bootloader => {
                self.boot_write(data);
                Ok(())
            }
        }
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.take_bus_error()?;
        match self.target(addr)? {
            Mode::Application => self.app_read(buf),
            Mode::Bootloader => {
                self.bootloader.read(buf);
                Ok(())
            }
        }
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        self.take_bus_error()?;
        if self.target(addr)? != Mode::Application {
            return Err(Error::Bus("dummy: combined transfer to the bootloader".into()));
        }
        if data.len() != 2 {
            return Err(Error::Bus("dummy: combined transfer needs a 2-byte address".into()));
        }
        self.pointer = u16::from_le_bytes([data[0], data[1]]);
        self.app_read(buf)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock_ms += ms as u64;
    }

    fn wait_chg(&mut self, timeout_ms: u32) -> Result<bool> {
        let asserted = match self.mode {
            Mode::Application => !self.queue.is_empty(),
            Mode::Bootloader => self.bootloader.chg_asserted(),
        };
        if asserted {
            return Ok(true);
        }
        self.clock_ms += timeout_ms as u64;
        Ok(false)
    }
}
