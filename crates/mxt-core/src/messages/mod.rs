//! Message dispatch pipeline
//!
//! Pending messages are drained from the message object (T5) when the CHG
//! line asserts. Devices with a message count object read the count first
//! and then exactly that many records; others read until the "no message"
//! report id comes back. Each record is routed by report id through the
//! directory's [`RouteTable`](crate::directory::RouteTable). Input devices
//! touched by a drain get a single sync once the whole drain is done.

pub mod decode;

use std::collections::VecDeque;

use crate::bus::I2cBus;
use crate::directory::{Directory, Route};
use crate::error::{Error, Result};
use crate::protocol::{object, report_id, T6Status};
use crate::resync::ResyncPolicy;
use crate::transport::{Integrity, Link, ReadOptions};

pub use decode::{ContactReport, Decoded, DiagnosticAssembler, InputDevice, TouchReport};

/// Messages kept by the capture log
pub const CAPTURE_CAPACITY: usize = 200;

/// One processed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Report id
    pub report_id: u8,
    /// Record bytes without the framing CRC
    pub data: Vec<u8>,
    /// Decoded content
    pub decoded: Decoded,
}

/// Consumer of decoded messages
pub trait MessageSink {
    /// Called for every processed message, in arrival order
    fn message(&mut self, message: &Message);

    /// Called once per drain for each input device that changed
    fn sync(&mut self, _device: InputDevice) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn message(&mut self, _message: &Message) {}
}

impl MessageSink for Vec<Message> {
    fn message(&mut self, message: &Message) {
        self.push(message.clone());
    }
}

/// Result of one drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Valid messages processed
    pub processed: usize,
    /// Framing is out of step and a resync should follow
    pub resync_needed: bool,
}

/// Bounded log of raw message records for debugging
#[derive(Debug, Clone)]
pub struct MessageLog {
    records: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl MessageLog {
    /// Create a log keeping at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, dropping the oldest when full
    pub fn push(&mut self, record: &[u8]) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record.to_vec());
    }

    /// Remove and return everything captured so far
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        self.records.drain(..).collect()
    }

    /// Number of captured records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is captured
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(CAPTURE_CAPACITY)
    }
}

/// Message processing state of one controller
#[derive(Debug, Default)]
pub struct Dispatcher {
    config_crc: u32,
    t6_status: T6Status,
    reset_seen: bool,
    crc_seen: bool,
    diagnostic: DiagnosticAssembler,
    capture: Option<MessageLog>,
    primary_changed: bool,
    secondary_changed: bool,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Config checksum last reported by the status object
    pub fn config_crc(&self) -> u32 {
        self.config_crc
    }

    /// Overwrite the cached config checksum
    pub fn set_config_crc(&mut self, crc: u32) {
        self.config_crc = crc;
    }

    /// Last status reported by the status object
    pub fn t6_status(&self) -> T6Status {
        self.t6_status
    }

    /// Forget earlier reset and checksum notifications
    pub fn arm(&mut self) {
        self.reset_seen = false;
        self.crc_seen = false;
    }

    /// Whether a reset was reported since the last [`arm`](Self::arm)
    pub fn reset_seen(&self) -> bool {
        self.reset_seen
    }

    /// Whether a checksum was reported since the last [`arm`](Self::arm)
    pub fn crc_seen(&self) -> bool {
        self.crc_seen
    }

    /// Start or stop capturing raw records
    pub fn set_capture(&mut self, enabled: bool) {
        match (enabled, self.capture.is_some()) {
            (true, false) => self.capture = Some(MessageLog::default()),
            (false, true) => self.capture = None,
            _ => {}
        }
    }

    /// Captured records, if capturing
    pub fn capture_mut(&mut self) -> Option<&mut MessageLog> {
        self.capture.as_mut()
    }

    /// Drain all pending messages
    pub fn drain<B: I2cBus>(
        &mut self,
        bus: &mut B,
        link: &mut Link,
        directory: &Directory,
        policy: &ResyncPolicy,
        sink: &mut dyn MessageSink,
    ) -> Result<DrainReport> {
        let message_addr = directory.require(object::GEN_MESSAGE_T5)?.start_address;
        let result = match directory.message_count_address() {
            Some(count_addr) => self.drain_counted(
                bus,
                link,
                directory,
                policy,
                sink,
                count_addr,
                message_addr,
            ),
            None => self.drain_until_empty(bus, link, directory, policy, sink),
        };
        // Input already delivered before a failed transfer still gets its sync
        self.flush_sync(sink);
        result
    }

    /// Drain by reading records until the "no message" id comes back
    ///
    /// Gives up after two passes over the report id space; the CHG line
    /// staying asserted is logged but not an error.
    pub fn drain_until_empty<B: I2cBus>(
        &mut self,
        bus: &mut B,
        link: &mut Link,
        directory: &Directory,
        policy: &ResyncPolicy,
        sink: &mut dyn MessageSink,
    ) -> Result<DrainReport> {
        let message_addr = directory.require(object::GEN_MESSAGE_T5)?.start_address;
        let budget = directory.max_report_id() as usize;
        let mut report = DrainReport::default();

        for _ in 0..2 {
            let pass = self
                .read_messages(
                    bus,
                    link,
                    directory,
                    policy,
                    sink,
                    message_addr,
                    budget,
                    ReadOptions::MESSAGE,
                )
                .inspect_err(|_| self.flush_sync(sink))?;
            report.processed += pass.processed;
            if pass.resync_needed || pass.processed < budget {
                report.resync_needed = pass.resync_needed;
                self.flush_sync(sink);
                return Ok(report);
            }
        }

        self.flush_sync(sink);
        log::warn!("messages: CHG line not cleared");
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn drain_counted<B: I2cBus>(
        &mut self,
        bus: &mut B,
        link: &mut Link,
        directory: &Directory,
        policy: &ResyncPolicy,
        sink: &mut dyn MessageSink,
        count_addr: u16,
        message_addr: u16,
    ) -> Result<DrainReport> {
        let size = directory.message_size();
        let mut report = DrainReport::default();

        let (count, first, first_integrity) = if link.is_crc() {
            let mut count_buf = [0u8; 2];
            let integrity = link.read(bus, count_addr, &mut count_buf, ReadOptions::MESSAGE)?;
            if integrity.is_mismatch() {
                report.resync_needed = self.check_crc_errors(link, policy);
                return Ok(report);
            }
            let mut first = vec![0u8; size];
            let mut first_integrity = Integrity::Unchecked;
            if count_buf[0] > 0 {
                first_integrity = link.read(bus, message_addr, &mut first, ReadOptions::MESSAGE)?;
            }
            (count_buf[0], first, first_integrity)
        } else {
            let mut buf = vec![0u8; size + 1];
            link.read(bus, count_addr, &mut buf, ReadOptions::REGISTER)?;
            let count = buf[0];
            buf.remove(0);
            (count, buf, Integrity::Unchecked)
        };

        if count == 0 {
            log::debug!("messages: interrupt without message");
            return Ok(report);
        }

        if self.check_crc_errors(link, policy) {
            report.resync_needed = true;
            return Ok(report);
        }

        if count > directory.max_report_id() {
            log::warn!(
                "messages: count {} exceeds max report id {}",
                count,
                directory.max_report_id()
            );
            report.resync_needed = link.is_crc() && policy.enabled;
            return Ok(report);
        }

        if !first_integrity.is_mismatch() && self.process(&first, link, directory, policy, sink)? {
            report.processed += 1;
        }

        let remaining = count as usize - 1;
        if remaining > 0 {
            let rest = self.read_messages(
                bus,
                link,
                directory,
                policy,
                sink,
                message_addr,
                remaining,
                ReadOptions::FOLLOW_UP,
            )?;
            if rest.processed != remaining && !rest.resync_needed {
                log::warn!(
                    "messages: expected {} more messages, got {}",
                    remaining,
                    rest.processed
                );
            }
            report.processed += rest.processed;
            report.resync_needed |= rest.resync_needed;
        }

        report.resync_needed |= self.take_comm_error_resync(link, policy);
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_messages<B: I2cBus>(
        &mut self,
        bus: &mut B,
        link: &mut Link,
        directory: &Directory,
        policy: &ResyncPolicy,
        sink: &mut dyn MessageSink,
        message_addr: u16,
        count: usize,
        opts: ReadOptions,
    ) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut record = vec![0u8; directory.message_size()];

        for _ in 0..count {
            let integrity = link.read(bus, message_addr, &mut record, opts)?;

            if self.check_crc_errors(link, policy) {
                report.resync_needed = true;
                return Ok(report);
            }

            if record.first().copied().unwrap_or(report_id::NO_MESSAGE) == report_id::NO_MESSAGE {
                break;
            }

            if integrity.is_mismatch() {
                continue;
            }

            if self.process(&record, link, directory, policy, sink)? {
                report.processed += 1;
            }

            if self.take_comm_error_resync(link, policy) {
                report.resync_needed = true;
                return Ok(report);
            }
        }

        Ok(report)
    }

    fn check_crc_errors(&self, link: &Link, policy: &ResyncPolicy) -> bool {
        if link.is_crc() && policy.crc_errors_exceeded(link.seq()) {
            if policy.enabled {
                return true;
            }
            log::warn!("messages: {} CRC errors, resync disabled", link.seq().crc_errors);
        }
        false
    }

    fn take_comm_error_resync(&self, link: &Link, policy: &ResyncPolicy) -> bool {
        link.is_crc() && policy.enabled && policy.comm_errors_exceeded(link.seq())
    }

    /// Process one message record
    ///
    /// Returns whether the record carried a valid report id.
    pub fn process(
        &mut self,
        record: &[u8],
        link: &mut Link,
        directory: &Directory,
        policy: &ResyncPolicy,
        sink: &mut dyn MessageSink,
    ) -> Result<bool> {
        let Some(&rid) = record.first() else {
            return Err(Error::protocol("empty message record"));
        };
        if rid == report_id::NO_MESSAGE || rid == report_id::RESERVED {
            return Ok(false);
        }

        let data = if link.is_crc() && record.len() > 1 {
            &record[..record.len() - 1]
        } else {
            record
        };

        let decoded = match directory.routes().lookup(rid) {
            Some(entry) => match entry.route {
                Route::Status => {
                    let decoded = decode::status(data);
                    self.handle_status(&decoded, link, policy);
                    decoded
                }
                Route::Touch => decode::touch(entry.range, data),
                Route::MultiTouch => decode::multi_touch(entry.range, data),
                Route::KeyArray => decode::keys(entry.range, data),
                Route::Gpio => decode::gpio(data),
                Route::TouchSuppression => decode::suppression(data),
                Route::Noise => decode::noise(data),
                Route::SymbolGesture => decode::symbol_gesture(data),
                Route::TouchSequence => decode::double_tap(data),
                Route::Diagnostic => self.diagnostic.feed(entry.range, data),
            },
            None => {
                let object_type = directory.object_for_report_id(rid).map(|(o, _)| o.object_type);
                log::debug!("messages: unhandled T{:?} message {:02X?}", object_type, data);
                Decoded::Unknown { object_type }
            }
        };

        match decoded.input_device() {
            Some(InputDevice::Primary) => self.primary_changed = true,
            Some(InputDevice::Secondary) => self.secondary_changed = true,
            None => {}
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.push(data);
        }

        sink.message(&Message {
            report_id: rid,
            data: data.to_vec(),
            decoded,
        });
        Ok(true)
    }

    fn handle_status(&mut self, decoded: &Decoded, link: &mut Link, policy: &ResyncPolicy) {
        let Decoded::Status { status, config_crc } = *decoded else {
            return;
        };

        if config_crc != self.config_crc {
            log::debug!("messages: T6 config checksum 0x{:06X}", config_crc);
            self.config_crc = config_crc;
        }
        self.crc_seen = true;

        if status.contains(T6Status::RESET) {
            self.reset_seen = true;
        }

        if status != self.t6_status {
            log::debug!("messages: T6 status 0x{:02X} {:?}", status.bits(), status);
        }

        if status.contains(T6Status::COMSERR) {
            if link.is_crc() && policy.enabled {
                let seq = link.seq_mut();
                seq.comm_errors = seq.comm_errors.saturating_add(1);
            } else if status != self.t6_status {
                log::error!("messages: T6 COMSERR");
            }
        } else {
            link.seq_mut().comm_errors = 0;
        }

        self.t6_status = status;
    }

    fn flush_sync(&mut self, sink: &mut dyn MessageSink) {
        if std::mem::take(&mut self.primary_changed) {
            sink.sync(InputDevice::Primary);
        }
        if std::mem::take(&mut self.secondary_changed) {
            sink.sync(InputDevice::Secondary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc8;
    use crate::directory::{encode_info_block, InfoBlock, ObjectEntry};
    use crate::transport::Framing;

    /// Plain-mode message source: T44 at 0x40, T5 at 0x41
    struct QueueBus {
        queue: VecDeque<Vec<u8>>,
        pointer: u16,
        crc: bool,
        reads_left: Option<usize>,
    }

    impl QueueBus {
        fn take_read(&mut self) -> Result<()> {
            match &mut self.reads_left {
                Some(0) => Err(Error::Bus("nack".into())),
                Some(n) => {
                    *n -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }

        fn pop(&mut self, len: usize) -> Vec<u8> {
            let mut record = self
                .queue
                .pop_front()
                .unwrap_or_else(|| vec![report_id::NO_MESSAGE]);
            record.resize(len, 0);
            if self.crc {
                let crc = crc8(&record[..len - 1]);
                record[len - 1] = crc;
            }
            record
        }
    }

    impl I2cBus for QueueBus {
        fn write(&mut self, _addr: u8, data: &[u8]) -> Result<()> {
            self.pointer = u16::from_le_bytes([data[0], data[1]]);
            Ok(())
        }

        fn read(&mut self, _addr: u8, buf: &mut [u8]) -> Result<()> {
            self.take_read()?;
            if self.pointer == 0x40 {
                buf[0] = self.queue.len() as u8;
                buf[1] = crc8(&buf[..1]);
            } else {
                buf.copy_from_slice(&self.pop(buf.len()));
            }
            Ok(())
        }

        fn write_read(&mut self, _addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
            self.take_read()?;
            let reg = u16::from_le_bytes([data[0], data[1]]);
            if reg == 0x40 {
                buf[0] = self.queue.len() as u8;
                let first = self.pop(buf.len() - 1);
                buf[1..].copy_from_slice(&first);
            } else {
                buf.copy_from_slice(&self.pop(buf.len()));
            }
            Ok(())
        }

        fn delay_ms(&mut self, _ms: u32) {}
    }

    #[derive(Default)]
    struct Recorder {
        messages: Vec<Message>,
        syncs: Vec<InputDevice>,
    }

    impl MessageSink for Recorder {
        fn message(&mut self, message: &Message) {
            self.messages.push(message.clone());
        }

        fn sync(&mut self, device: InputDevice) {
            self.syncs.push(device);
        }
    }

    fn directory(count_type: u8) -> Directory {
        let header = InfoBlock {
            family_id: if count_type == object::SPT_MESSAGECOUNT_T144 { 0xA6 } else { 0x81 },
            variant_id: 0x01,
            version: 0x20,
            build: 0xAA,
            matrix_x: 16,
            matrix_y: 14,
            object_count: 0,
        };
        let objects = vec![
            ObjectEntry::new(count_type, 0x40, if count_type == object::SPT_MESSAGECOUNT_T144 { 2 } else { 1 }, 1, 0),
            ObjectEntry::new(object::GEN_MESSAGE_T5, 0x41, 10, 1, 0),
            ObjectEntry::new(object::GEN_COMMAND_T6, 0x50, 6, 1, 1),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 0x60, 36, 1, 10),
        ];
        Directory::parse(&encode_info_block(&header, &objects)).unwrap()
    }

    fn plain_bus(records: &[&[u8]]) -> QueueBus {
        QueueBus {
            queue: records.iter().map(|r| r.to_vec()).collect(),
            pointer: 0,
            crc: false,
            reads_left: None,
        }
    }

    #[test]
    fn test_fast_path_routes_touch() {
        let dir = directory(object::SPT_MESSAGECOUNT_T44);
        let mut bus = plain_bus(&[&[1, 0x00, 0x11, 0x22, 0x33], &[2, 0xC0, 0x10, 0x20, 0x00, 5, 30]]);
        let mut link = Link::new(0x4a);
        let mut dispatcher = Dispatcher::new();
        let mut sink = Recorder::default();

        let report = dispatcher
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();

        assert_eq!(report.processed, 2);
        assert!(!report.resync_needed);
        let touches: Vec<_> = sink
            .messages
            .iter()
            .filter(|m| matches!(m.decoded, Decoded::Touch(_)))
            .collect();
        assert_eq!(touches.len(), 1);
        assert_eq!(dispatcher.config_crc(), 0x332211);
        assert!(dispatcher.crc_seen());
        assert_eq!(sink.syncs, vec![InputDevice::Primary]);
    }

    #[test]
    fn test_zero_count_is_noop() {
        let dir = directory(object::SPT_MESSAGECOUNT_T44);
        let mut bus = plain_bus(&[]);
        let mut link = Link::new(0x4a);
        let mut sink = Recorder::default();
        let report = Dispatcher::new()
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();
        assert_eq!(report, DrainReport::default());
        assert!(sink.syncs.is_empty());
    }

    #[test]
    fn test_sync_coalesced() {
        let dir = directory(object::SPT_MESSAGECOUNT_T44);
        let touch: &[u8] = &[3, 0x90, 0x10, 0x20, 0x00, 5, 30];
        let mut bus = plain_bus(&[touch, touch, touch, touch]);
        let mut link = Link::new(0x4a);
        let mut sink = Recorder::default();
        let report = Dispatcher::new()
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(sink.syncs, vec![InputDevice::Primary]);
    }

    #[test]
    fn test_sync_flushed_on_bus_error() {
        let dir = directory(object::SPT_MESSAGECOUNT_T44);
        let touch: &[u8] = &[3, 0x90, 0x10, 0x20, 0x00, 5, 30];
        let mut bus = QueueBus {
            reads_left: Some(1),
            ..plain_bus(&[touch, touch, touch])
        };
        let mut link = Link::new(0x4a);
        let mut dispatcher = Dispatcher::new();
        let mut sink = Recorder::default();

        let err = dispatcher
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Bus);
        assert_eq!(sink.messages.len(), 1);
        assert_eq!(sink.syncs, vec![InputDevice::Primary]);

        // Nothing left over for the next drain
        let mut idle = plain_bus(&[]);
        let mut sink = Recorder::default();
        dispatcher
            .drain(&mut idle, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();
        assert!(sink.syncs.is_empty());
    }

    #[test]
    fn test_crc_fast_path() {
        let dir = directory(object::SPT_MESSAGECOUNT_T144);
        let mut bus = QueueBus {
            crc: true,
            ..plain_bus(&[&[1, 0x80, 0x01, 0x02, 0x03], &[2, 0x90, 0, 0, 0, 1, 1]])
        };
        let mut link = Link::new(0x4a);
        link.set_framing(Framing::Crc);
        let mut dispatcher = Dispatcher::new();
        let mut sink = Recorder::default();

        let report = dispatcher
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();
        assert_eq!(report.processed, 2);
        assert!(dispatcher.reset_seen());
        // Framing CRC is stripped before the record reaches the sink
        assert_eq!(sink.messages[0].data.len(), 9);
    }

    #[test]
    fn test_comms_errors_request_resync() {
        let dir = directory(object::SPT_MESSAGECOUNT_T144);
        let comserr: &[u8] = &[1, 0x04, 0, 0, 0];
        let mut bus = QueueBus {
            crc: true,
            ..plain_bus(&[comserr; 5])
        };
        let mut link = Link::new(0x4a);
        link.set_framing(Framing::Crc);
        let report = Dispatcher::new()
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut NullSink)
            .unwrap();
        assert!(report.resync_needed);
        assert_eq!(link.seq().comm_errors, 5);
    }

    #[test]
    fn test_poll_path_stops_at_no_message() {
        let header = InfoBlock {
            family_id: 0x81,
            variant_id: 0x01,
            version: 0x20,
            build: 0xAA,
            matrix_x: 16,
            matrix_y: 14,
            object_count: 0,
        };
        let objects = vec![
            ObjectEntry::new(object::GEN_MESSAGE_T5, 0x41, 10, 1, 0),
            ObjectEntry::new(object::GEN_COMMAND_T6, 0x50, 6, 1, 1),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 0x60, 36, 1, 10),
        ];
        let dir = Directory::parse(&encode_info_block(&header, &objects)).unwrap();
        let mut bus = plain_bus(&[&[5, 0x90, 0, 0, 0, 1, 1], &[1, 0x00, 0, 0, 0]]);
        let mut link = Link::new(0x4a);
        let mut sink = Recorder::default();

        let report = Dispatcher::new()
            .drain(&mut bus, &mut link, &dir, &ResyncPolicy::default(), &mut sink)
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(sink.syncs, vec![InputDevice::Primary]);
    }

    #[test]
    fn test_capture_ring() {
        let mut log = MessageLog::new(2);
        log.push(&[1]);
        log.push(&[2]);
        log.push(&[3]);
        assert_eq!(log.take(), vec![vec![2], vec![3]]);
        assert!(log.is_empty());
    }
}
