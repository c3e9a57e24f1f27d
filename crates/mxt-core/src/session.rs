//! Per-controller session
//!
//! [`Controller`] owns the bus, the register link with its sequence state,
//! the parsed directory and the message dispatcher. Every operation that
//! reconfigures the device runs through [`Controller::administrative`],
//! which gates interrupt driven message processing off for its duration.

use crate::bootloader::{self, Bootloader, FirmwareImage, FlashProgress, FlashReport};
use crate::bus::{I2cBus, CHG_POLL_MS};
use crate::config::{self, ApplyOutcome, ApplyReport, RawConfig};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::messages::{Dispatcher, DrainReport, MessageSink, NullSink};
use crate::protocol::{command, comms, object, power, timing, T6Status, MAX_BLOCK_WRITE};
use crate::resync::{self, ResyncPolicy, SyncState};
use crate::transport::{Framing, Link, ReadOptions};

/// Engine policy knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Resync policy for CRC framing
    pub resync: ResyncPolicy,
    /// Wait for the reset status after a soft reset
    pub reset_timeout_ms: u32,
    /// Wait for the config checksum after backup or report-all
    pub crc_timeout_ms: u32,
    /// Wait for each bootloader state change
    pub bootloader_timeout_ms: u32,
    /// Largest register write in one burst
    pub max_block_write: usize,
    /// Retries of one firmware frame
    pub frame_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resync: ResyncPolicy::default(),
            reset_timeout_ms: timing::RESET_TIMEOUT,
            crc_timeout_ms: timing::CRC_TIMEOUT,
            bootloader_timeout_ms: timing::FW_CHG_TIMEOUT,
            max_block_write: MAX_BLOCK_WRITE,
            frame_retries: bootloader::FRAME_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic resync
    pub fn with_resync(mut self, enabled: bool) -> Self {
        self.resync.enabled = enabled;
        self
    }

    /// Set the resync attempt budget
    pub fn with_resync_attempts(mut self, attempts: u32) -> Self {
        self.resync.max_attempts = attempts;
        self
    }

    /// Set the CRC error threshold
    pub fn with_crc_error_threshold(mut self, threshold: u8) -> Self {
        self.resync.crc_error_threshold = threshold;
        self
    }

    /// Set the COMSERR threshold
    pub fn with_comm_error_threshold(mut self, threshold: u8) -> Self {
        self.resync.comm_error_threshold = threshold;
        self
    }

    /// Set the reset timeout
    pub fn with_reset_timeout(mut self, timeout_ms: u32) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }

    /// Set the checksum timeout
    pub fn with_crc_timeout(mut self, timeout_ms: u32) -> Self {
        self.crc_timeout_ms = timeout_ms;
        self
    }

    /// Set the bootloader state change timeout
    pub fn with_bootloader_timeout(mut self, timeout_ms: u32) -> Self {
        self.bootloader_timeout_ms = timeout_ms;
        self
    }

    /// Set the write burst size (at least one byte)
    pub fn with_max_block_write(mut self, size: usize) -> Self {
        self.max_block_write = size.max(1);
        self
    }

    /// Set the retry bound per firmware frame
    pub fn with_frame_retries(mut self, retries: u32) -> Self {
        self.frame_retries = retries;
        self
    }
}

/// Session state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not initialised, or sync was lost for good
    NotReady,
    /// Only the bootloader answers; flashing is allowed
    Bootloader,
    /// Application firmware running, messages are processed
    Normal {
        /// CRC framing is active
        crc_framed: bool,
    },
    /// An administrative operation owns the device
    AdministrativeOperation {
        /// CRC framing is active
        crc_framed: bool,
    },
}

impl SessionState {
    /// Whether CRC framing is active
    pub fn is_crc_framed(&self) -> bool {
        matches!(
            self,
            Self::Normal { crc_framed: true } | Self::AdministrativeOperation { crc_framed: true }
        )
    }
}

/// Power mode of the acquisition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Use the stored idle and active intervals
    Run,
    /// Stop acquisition
    DeepSleep,
}

/// Contents of one object instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDump {
    /// Object type
    pub object_type: u8,
    /// Instance
    pub instance: usize,
    /// Register of the instance
    pub address: u16,
    /// Object bytes
    pub data: Vec<u8>,
}

/// One maXTouch controller
pub struct Controller<B: I2cBus> {
    bus: B,
    link: Link,
    config: EngineConfig,
    state: SessionState,
    sync_state: SyncState,
    directory: Option<Directory>,
    dispatcher: Dispatcher,
    bootloader_address: Option<u8>,
    power: [u8; 2],
}

impl<B: I2cBus> Controller<B> {
    /// Create a controller for the application firmware at `address`
    pub fn new(bus: B, address: u8, config: EngineConfig) -> Self {
        Self {
            bus,
            link: Link::new(address),
            config,
            state: SessionState::NotReady,
            sync_state: SyncState::InSync,
            directory: None,
            dispatcher: Dispatcher::new(),
            bootloader_address: None,
            power: [power::DEFAULT_IDLE, power::DEFAULT_ACTIVE],
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether CRC framing is in lock-step with the device
    ///
    /// Stays [`SyncState::Resyncing`] after an exhausted resync until the
    /// next [`Controller::initialize`].
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Parsed directory, once initialised
    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bus handle
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable bus handle
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give the bus back
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Address of the bootloader, once it was found
    pub fn bootloader_address(&self) -> Option<u8> {
        self.bootloader_address
    }

    /// Next transmit sequence number
    pub fn tx_seq(&self) -> u8 {
        self.link.seq().tx_seq
    }

    /// Overwrite the transmit sequence number
    pub fn set_tx_seq(&mut self, seq: u8) {
        log::debug!("session: tx_seq {} -> {}", self.link.seq().tx_seq, seq);
        self.link.seq_mut().tx_seq = seq;
    }

    /// Config checksum last reported by the device
    pub fn config_crc(&self) -> u32 {
        self.dispatcher.config_crc()
    }

    /// Last status reported by the command processor
    pub fn t6_status(&self) -> T6Status {
        self.dispatcher.t6_status()
    }

    /// Start or stop capturing raw message records
    pub fn set_capture(&mut self, enabled: bool) {
        self.dispatcher.set_capture(enabled);
    }

    /// Remove and return captured records
    pub fn take_capture(&mut self) -> Vec<Vec<u8>> {
        self.dispatcher
            .capture_mut()
            .map(|log| log.take())
            .unwrap_or_default()
    }

    fn dir(&self) -> Result<&Directory> {
        self.directory
            .as_ref()
            .ok_or_else(|| Error::protocol(format!("device not ready ({:?})", self.state)))
    }

    fn require_app(&self) -> Result<()> {
        match self.state {
            SessionState::Normal { .. } | SessionState::AdministrativeOperation { .. } => Ok(()),
            other => Err(Error::protocol(format!(
                "operation needs application firmware, session is {:?}",
                other
            ))),
        }
    }

    fn enter_normal(&mut self) {
        self.state = SessionState::Normal {
            crc_framed: self.link.is_crc(),
        };
    }

    /// Read the info block and bring the session up
    ///
    /// When the application does not answer, the bootloader is probed on
    /// both candidate addresses. A bootloader that answers is asked to
    /// start the application; if that fails too the session stays in
    /// [`SessionState::Bootloader`] so the device can be flashed.
    pub fn initialize(&mut self) -> Result<()> {
        self.state = SessionState::NotReady;
        self.sync_state = SyncState::InSync;
        self.link.set_framing(Framing::Plain);
        self.link.seq_mut().reset();

        let dir = match resync::read_info_block(&mut self.bus, &mut self.link) {
            Ok(dir) => dir,
            Err(e) => {
                log::warn!("session: info block read failed: {}", e);
                let Some(address) = self.find_bootloader() else {
                    return Err(e);
                };

                if let Err(exit) = Bootloader::new(address).exit(&mut self.bus) {
                    log::warn!("session: bootloader exit failed: {}", exit);
                }
                self.bus.delay_ms(timing::FW_RESET_TIME);

                match resync::read_info_block(&mut self.bus, &mut self.link) {
                    Ok(dir) => dir,
                    Err(e) => {
                        log::error!("session: application did not start ({}), staying in bootloader", e);
                        self.bootloader_address = Some(address);
                        self.state = SessionState::Bootloader;
                        return Ok(());
                    }
                }
            }
        };

        self.bring_up(dir)?;
        self.post_reset_setup()
    }

    fn find_bootloader(&mut self) -> Option<u8> {
        [false, true].into_iter().find_map(|retry| match self.probe_bootloader(retry) {
            Ok(found) => found,
            Err(e) => {
                log::debug!("session: bootloader probe failed: {}", e);
                None
            }
        })
    }

    /// Look for a bootloader on the primary (`retry = false`) or alternate address
    pub fn probe_bootloader(&mut self, retry: bool) -> Result<Option<u8>> {
        let family = self.directory.as_ref().map_or(0, |d| d.info().family_id);
        let address = bootloader::bootloader_address(self.link.address(), family, retry)?;
        match Bootloader::new(address).probe(&mut self.bus) {
            Ok(_) => Ok(Some(address)),
            Err(e) => {
                log::debug!("session: no bootloader at 0x{:02x}: {}", address, e);
                Ok(None)
            }
        }
    }

    fn bring_up(&mut self, dir: Directory) -> Result<()> {
        let framing = if dir.is_crc_framed() {
            Framing::Crc
        } else {
            Framing::Plain
        };
        self.link.set_framing(framing);
        log::info!(
            "session: family 0x{:02X} variant 0x{:02X} firmware {} objects {}{}",
            dir.info().family_id,
            dir.info().variant_id,
            dir.info().firmware(),
            dir.info().object_count,
            if dir.is_crc_framed() { ", CRC framing" } else { "" }
        );
        self.directory = Some(dir);
        self.bootloader_address = None;
        self.enter_normal();
        self.drain(&mut NullSink)?;
        Ok(())
    }

    fn post_reset_setup(&mut self) -> Result<()> {
        if !self.link.is_crc() {
            self.check_retrigen()?;
        }
        self.init_power_config()
    }

    /// Run one message drain in response to the CHG interrupt
    ///
    /// Ignored unless the session is [`SessionState::Normal`].
    pub fn handle_interrupt(&mut self, sink: &mut dyn MessageSink) -> Result<DrainReport> {
        if !matches!(self.state, SessionState::Normal { .. }) {
            log::debug!("session: interrupt ignored in {:?}", self.state);
            return Ok(DrainReport::default());
        }
        self.drain(sink)
    }

    fn drain(&mut self, sink: &mut dyn MessageSink) -> Result<DrainReport> {
        let dir = self
            .directory
            .as_ref()
            .ok_or_else(|| Error::protocol("no directory"))?;
        let report = self
            .dispatcher
            .drain(&mut self.bus, &mut self.link, dir, &self.config.resync, sink)?;
        if report.resync_needed {
            self.resync_link()?;
        }
        Ok(report)
    }

    /// Re-establish CRC framing
    ///
    /// Runs as an administrative operation. Returns the number of attempts
    /// used. On failure the session drops to [`SessionState::NotReady`].
    pub fn resync(&mut self) -> Result<u32> {
        self.administrative(|ctl| ctl.resync_link())
    }

    fn resync_link(&mut self) -> Result<u32> {
        let dir = self
            .directory
            .as_ref()
            .ok_or_else(|| Error::protocol("resync needs a directory"))?;
        self.sync_state = SyncState::Resyncing;
        match resync::resync(&mut self.bus, &mut self.link, dir, &self.config.resync) {
            Ok(outcome) => {
                if let Some(dir) = outcome.directory {
                    self.directory = Some(dir);
                }
                self.sync_state = SyncState::InSync;
                Ok(outcome.attempts)
            }
            Err(e) => {
                self.state = SessionState::NotReady;
                Err(e)
            }
        }
    }

    /// Run `op` with message processing gated off
    ///
    /// The previous state is restored on every exit path, unless `op`
    /// itself moved the session to `NotReady` or `Bootloader`.
    pub fn administrative<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match self.state {
            SessionState::Normal { crc_framed } => {
                self.state = SessionState::AdministrativeOperation { crc_framed };
            }
            SessionState::AdministrativeOperation { .. } => return op(self),
            other => {
                return Err(Error::protocol(format!(
                    "administrative operation not allowed in {:?}",
                    other
                )))
            }
        }

        let result = op(self);
        if matches!(self.state, SessionState::AdministrativeOperation { .. }) {
            self.enter_normal();
        }
        result
    }

    /// Drain messages until `done` holds or `timeout_ms` elapses
    fn wait_for(
        &mut self,
        what: &'static str,
        timeout_ms: u32,
        done: fn(&Dispatcher) -> bool,
    ) -> Result<()> {
        let mut waited = 0;
        loop {
            self.drain(&mut NullSink)?;
            if done(&self.dispatcher) {
                return Ok(());
            }
            if waited >= timeout_ms {
                log::error!("session: timed out waiting for {}", what);
                return Err(Error::Timeout { what, timeout_ms });
            }
            let slice = CHG_POLL_MS.min(timeout_ms - waited);
            self.bus.wait_chg(slice)?;
            waited += slice;
        }
    }

    /// Read `len` bytes at register `reg`
    pub fn read_register(&mut self, reg: u16, len: usize) -> Result<Vec<u8>> {
        self.require_app()?;
        let mut buf = vec![0u8; len];
        self.link
            .read(&mut self.bus, reg, &mut buf, ReadOptions::REGISTER)?;
        Ok(buf)
    }

    /// Write `data` at register `reg` in bursts
    pub fn write_register(&mut self, reg: u16, data: &[u8]) -> Result<()> {
        self.require_app()?;
        self.write_block(reg, data)
    }

    fn write_block(&mut self, reg: u16, data: &[u8]) -> Result<()> {
        if reg as usize + data.len() > ADDRESS_SPACE {
            return Err(address_overflow(reg, data.len()));
        }
        for (i, chunk) in data.chunks(self.config.max_block_write).enumerate() {
            let offset = (i * self.config.max_block_write) as u16;
            self.link.write(&mut self.bus, reg + offset, chunk)?;
        }
        Ok(())
    }

    fn instance_address(&self, object_type: u8, instance: usize) -> Result<(u16, usize)> {
        let obj = self.dir()?.require(object_type)?;
        if instance >= obj.instances() {
            return Err(Error::protocol(format!(
                "T{} has {} instance(s), {} requested",
                object_type,
                obj.instances(),
                instance
            )));
        }
        Ok((obj.address_of(instance), obj.size()))
    }

    /// Read one object instance
    pub fn read_object(&mut self, object_type: u8, instance: usize) -> Result<Vec<u8>> {
        self.require_app()?;
        let (address, size) = self.instance_address(object_type, instance)?;
        self.read_register(address, size)
    }

    /// Write `data` into an object instance starting at `offset`
    pub fn write_object(
        &mut self,
        object_type: u8,
        instance: usize,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        self.require_app()?;
        let (address, size) = self.instance_address(object_type, instance)?;
        if offset + data.len() > size {
            return Err(Error::protocol(format!(
                "write of {} byte(s) at offset {} overruns T{} ({} bytes)",
                data.len(),
                offset,
                object_type,
                size
            )));
        }
        let start = u16::try_from(offset)
            .ok()
            .and_then(|offset| address.checked_add(offset))
            .ok_or_else(|| address_overflow(address, offset))?;
        self.write_block(start, data)
    }

    /// Read every instance of every readable object
    pub fn dump_objects(&mut self) -> Result<Vec<ObjectDump>> {
        self.require_app()?;
        let instances: Vec<(u8, usize, u16, usize)> = self
            .dir()?
            .objects()
            .iter()
            .filter(|o| crate::protocol::is_readable(o.object_type))
            .flat_map(|o| {
                (0..o.instances()).map(move |i| (o.object_type, i, o.address_of(i), o.size()))
            })
            .collect();

        let mut dumps = Vec::with_capacity(instances.len());
        for (object_type, instance, address, size) in instances {
            let data = self.read_register(address, size)?;
            dumps.push(ObjectDump {
                object_type,
                instance,
                address,
                data,
            });
        }
        Ok(dumps)
    }

    /// Write a command processor register, optionally polling until it clears
    pub fn t6_command(&mut self, offset: u16, value: u8, wait: bool) -> Result<()> {
        self.require_app()?;
        let start = self.dir()?.require(object::GEN_COMMAND_T6)?.start_address;
        let reg = start
            .checked_add(offset)
            .ok_or_else(|| address_overflow(start, offset as usize))?;
        self.link.write(&mut self.bus, reg, &[value])?;
        if !wait {
            return Ok(());
        }

        let mut val = [0u8; 1];
        for _ in 0..=timing::COMMAND_POLL_LIMIT {
            self.bus.delay_ms(timing::COMMAND_POLL);
            self.link
                .read(&mut self.bus, reg, &mut val, ReadOptions::REGISTER)?;
            if val[0] == 0 {
                return Ok(());
            }
        }

        log::error!("session: T6 command {} did not complete", offset);
        Err(Error::Timeout {
            what: "T6 command",
            timeout_ms: timing::COMMAND_POLL * (timing::COMMAND_POLL_LIMIT + 1),
        })
    }

    /// Issue a command that makes the device report its config checksum
    fn update_crc(&mut self, offset: u16, value: u8) -> Result<()> {
        self.dispatcher.arm();
        self.t6_command(offset, value, true)?;
        let timeout = self.config.crc_timeout_ms;
        self.wait_for("config checksum", timeout, Dispatcher::crc_seen)
    }

    fn reset_and_wait(&mut self) -> Result<()> {
        log::info!("session: resetting device");
        self.dispatcher.arm();
        self.t6_command(command::RESET, command::RESET_VALUE, false)?;
        if self.link.is_crc() {
            self.link.seq_mut().reset();
        }
        self.bus.delay_ms(timing::RESET_INVALID_CHG);
        let timeout = self.config.reset_timeout_ms;
        self.wait_for("reset", timeout, Dispatcher::reset_seen)
    }

    /// Reset the device and wait for it to report the reset
    pub fn soft_reset(&mut self) -> Result<()> {
        self.administrative(|ctl| ctl.reset_and_wait())
    }

    /// Recalibrate
    pub fn calibrate(&mut self) -> Result<()> {
        self.administrative(|ctl| ctl.t6_command(command::CALIBRATE, 1, false))
    }

    /// Save the running configuration to non-volatile memory
    pub fn backup(&mut self) -> Result<()> {
        self.administrative(|ctl| ctl.update_crc(command::BACKUPNV, command::BACKUP_VALUE))
    }

    /// Ask every object to report its state
    pub fn report_all(&mut self) -> Result<()> {
        self.administrative(|ctl| ctl.update_crc(command::REPORTALL, 1))
    }

    /// Make sure CHG retriggers while messages are pending
    pub fn check_retrigen(&mut self) -> Result<()> {
        let Some(t18) = self.dir()?.address(object::SPT_COMMSCONFIG_T18) else {
            log::debug!("session: no T18, RETRIGEN not checked");
            return Ok(());
        };
        let reg = t18 + comms::CTRL;
        let mut val = [0u8; 1];
        self.link
            .read(&mut self.bus, reg, &mut val, ReadOptions::REGISTER)?;

        if val[0] & comms::RETRIGEN != 0 {
            log::info!("session: RETRIGEN enabled");
            return Ok(());
        }

        log::warn!("session: enabling RETRIGEN");
        self.link
            .write(&mut self.bus, reg, &[val[0] | comms::RETRIGEN])
    }

    /// Load the power configuration, writing defaults over zero intervals
    pub fn init_power_config(&mut self) -> Result<()> {
        let Some(t7) = self.dir()?.address(object::GEN_POWER_T7) else {
            log::debug!("session: no T7, power config skipped");
            return Ok(());
        };

        let mut cfg = [0u8; 2];
        for attempt in 0..2 {
            self.link
                .read(&mut self.bus, t7, &mut cfg, ReadOptions::REGISTER)?;
            if cfg[0] != 0 && cfg[1] != 0 {
                break;
            }
            if attempt == 0 {
                log::info!("session: T7 config zero, rechecking");
            } else {
                cfg = [power::DEFAULT_IDLE, power::DEFAULT_ACTIVE];
                self.link.write(&mut self.bus, t7, &cfg)?;
                log::warn!("session: T7 config was zero, set to defaults");
            }
        }

        self.power = cfg;
        log::info!("session: power config ACTV {}, IDLE {}", cfg[1], cfg[0]);
        Ok(())
    }

    /// Switch the acquisition power mode
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        self.require_app()?;
        let t7 = self.dir()?.require(object::GEN_POWER_T7)?.start_address;
        let cfg = match mode {
            PowerMode::Run => self.power,
            PowerMode::DeepSleep => [0, 0],
        };
        log::debug!("session: power mode {:?}", mode);
        self.link.write(&mut self.bus, t7, &cfg)
    }

    /// Apply an `OBP_RAW` configuration
    ///
    /// The file is parsed and checked against the device before anything
    /// is written. A file whose checksum matches the device is skipped.
    pub fn apply_config(&mut self, text: &str) -> Result<ApplyOutcome> {
        let raw = RawConfig::parse(text)?;
        self.administrative(|ctl| ctl.apply_parsed(&raw))
    }

    fn apply_parsed(&mut self, raw: &RawConfig) -> Result<ApplyOutcome> {
        if self.dispatcher.config_crc() == 0 {
            if let Err(e) = self.update_crc(command::REPORTALL, 1) {
                log::warn!("config: could not refresh device CRC: {}", e);
            }
        }
        self.drain(&mut NullSink)?;

        let dir = self.dir()?;
        if let Some(reason) = config::check(raw, dir, self.dispatcher.config_crc())? {
            return Ok(ApplyOutcome::Skipped(reason));
        }
        let plan = config::plan(raw, dir)?;
        let calculated_crc = config::crc_start(dir).and_then(|start| plan.calculate_crc(start));

        let crc_matches = calculated_crc == Some(raw.config_crc);
        match calculated_crc {
            Some(crc) if !crc_matches => {
                log::warn!(
                    "config: CRC in file inconsistent, calculated 0x{:06X} file 0x{:06X}",
                    crc,
                    raw.config_crc
                );
                if plan.skipped_bytes > 0 {
                    log::warn!(
                        "config: {} byte(s) of absent or volatile objects skipped, the CRC cannot match",
                        plan.skipped_bytes
                    );
                }
            }
            None => log::warn!("config: no checksum start object, CRC not checked"),
            _ => {}
        }

        // Stop T70 from rewriting objects under us
        self.t6_command(command::BACKUPNV, command::BACKUP_STOP_DYNAMIC, false)?;

        for placement in &plan.placements {
            log::debug!(
                "config: writing T{} instance {} ({} bytes) at 0x{:04X}",
                placement.object_type,
                placement.instance,
                placement.data.len(),
                placement.register
            );
            self.write_block(placement.register, &placement.data)?;
            self.bus.delay_ms(timing::OBJECT_WRITE_PAUSE);
        }

        self.bus.delay_ms(timing::BACKUP_TIME);
        self.t6_command(command::BACKUPNV, command::BACKUP_VALUE, false)?;
        self.bus.delay_ms(timing::RESET_TIME);
        self.reset_and_wait()?;
        self.post_reset_setup()?;

        let report = ApplyReport {
            objects_written: plan.placements.len(),
            objects_skipped: plan.skipped_records,
            bytes_written: plan.bytes_to_write(),
            skipped_bytes: plan.skipped_bytes,
            calculated_crc,
            crc_matches,
        };
        log::info!(
            "config: wrote {} object(s), {} bytes, skipped {}",
            report.objects_written,
            report.bytes_written,
            report.objects_skipped
        );
        Ok(ApplyOutcome::Applied(report))
    }

    /// Zero the whole configuration region and back it up
    pub fn clear_config(&mut self) -> Result<()> {
        self.administrative(|ctl| {
            let dir = ctl.dir()?;
            let start = dir.config_start();
            let zeros = vec![0u8; dir.mem_size().saturating_sub(start)];
            log::info!("config: clearing {} bytes from 0x{:04X}", zeros.len(), start);

            ctl.write_block(start as u16, &zeros)?;
            ctl.t6_command(command::BACKUPNV, command::BACKUP_VALUE, false)?;
            ctl.bus.delay_ms(timing::CLEAR_CONFIG_TIME);
            Ok(())
        })
    }

    /// Flash a firmware image
    ///
    /// From [`SessionState::Normal`] the device is first reset into its
    /// bootloader. After the last frame the info block is read again and the
    /// session comes back up with the framing of the new firmware. A failed
    /// flash leaves the session in [`SessionState::Bootloader`].
    pub fn flash_firmware(
        &mut self,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> Result<FlashReport> {
        let image = FirmwareImage::parse(data)?;
        log::info!("bootloader: image {} bytes, {} frames", image.len(), image.frame_count());

        let address = match self.state {
            SessionState::Bootloader => self
                .bootloader_address
                .ok_or_else(|| Error::protocol("bootloader address unknown"))?,
            SessionState::Normal { .. } => self.administrative(|ctl| ctl.enter_bootloader())?,
            other => {
                return Err(Error::protocol(format!(
                    "cannot flash in {:?}, initialize first",
                    other
                )))
            }
        };
        self.state = SessionState::Bootloader;
        self.bootloader_address = Some(address);

        let boot = Bootloader::new(address)
            .with_chg_timeout(self.config.bootloader_timeout_ms)
            .with_frame_retries(self.config.frame_retries);
        let report = boot.flash(&mut self.bus, &image, progress)?;

        self.bus.delay_ms(timing::FW_FLASH_TIME);
        self.link.seq_mut().reset();
        self.link.set_framing(Framing::Plain);
        self.state = SessionState::NotReady;

        let dir = resync::read_info_block(&mut self.bus, &mut self.link)?;
        self.bring_up(dir)?;
        if !self.link.is_crc() {
            self.check_retrigen()?;
        }
        self.soft_reset()?;
        self.init_power_config()?;
        Ok(report)
    }

    fn enter_bootloader(&mut self) -> Result<u8> {
        let family = self.dir()?.info().family_id;
        log::info!("bootloader: resetting into bootloader");
        self.t6_command(command::RESET, command::BOOT_VALUE, false)?;
        self.bus.delay_ms(timing::RESET_TIME);
        bootloader::bootloader_address(self.link.address(), family, false)
    }
}

/// Size of the 16-bit register map
const ADDRESS_SPACE: usize = 1 << 16;

fn address_overflow(base: u16, offset: usize) -> Error {
    Error::protocol(format!(
        "register 0x{:04X} + {} is outside the address map",
        base, offset
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let cfg = EngineConfig::new()
            .with_resync(false)
            .with_resync_attempts(10)
            .with_crc_timeout(50)
            .with_max_block_write(0);
        assert!(!cfg.resync.enabled);
        assert_eq!(cfg.resync.max_attempts, 10);
        assert_eq!(cfg.crc_timeout_ms, 50);
        assert_eq!(cfg.max_block_write, 1);
        assert_eq!(cfg.reset_timeout_ms, timing::RESET_TIMEOUT);
        assert_eq!(EngineConfig::default().frame_retries, 20);
    }

    #[test]
    fn test_session_state_framing() {
        assert!(SessionState::Normal { crc_framed: true }.is_crc_framed());
        assert!(SessionState::AdministrativeOperation { crc_framed: true }.is_crc_framed());
        assert!(!SessionState::Normal { crc_framed: false }.is_crc_framed());
        assert!(!SessionState::Bootloader.is_crc_framed());
    }
}
