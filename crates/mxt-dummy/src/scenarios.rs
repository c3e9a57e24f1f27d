//! Engine scenarios against the emulated controller

use mxt_core::bootloader::NoProgress;
use mxt_core::config::{ApplyOutcome, ConfigRecord, RawConfig, SkipReason};
use mxt_core::messages::{Decoded, InputDevice, Message, MessageSink, NullSink};
use mxt_core::protocol::{comms, object, power};
use mxt_core::resync::SyncState;
use mxt_core::session::PowerMode;
use mxt_core::{Controller, EngineConfig, ErrorKind, SessionState};

use super::*;

fn controller(config: DummyConfig, engine: EngineConfig) -> Controller<DummyController> {
    let dummy = DummyController::new(config).unwrap();
    let mut ctl = Controller::new(dummy, 0x4a, engine);
    ctl.initialize().unwrap();
    ctl
}

fn plain() -> Controller<DummyController> {
    controller(DummyConfig::plain(), EngineConfig::default())
}

fn crc() -> Controller<DummyController> {
    controller(DummyConfig::crc(), EngineConfig::default())
}

fn record(object_type: u8, data: &[u8]) -> ConfigRecord {
    ConfigRecord {
        object_type,
        instance: 0,
        data: data.to_vec(),
    }
}

fn plain_records() -> Vec<ConfigRecord> {
    vec![
        record(object::GEN_POWER_T7, &[100, 20, 5, 0]),
        record(object::GEN_ACQUIRE_T8, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
        record(object::TOUCH_MULTI_T9, &[0x11; 36]),
        record(object::TOUCH_KEYARRAY_T15, &[0x22; 11]),
        record(object::SPT_COMMSCONFIG_T18, &[comms::RETRIGEN, 0]),
        record(object::SPT_GPIOPWM_T19, &[0x33; 16]),
        record(object::PROCI_TOUCHSUPPRESSION_T42, &[0x44; 8]),
        record(object::PROCG_NOISESUPPRESSION_T48, &[0x55; 20]),
        record(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, &[0x66; 16]),
    ]
}

/// Render a config file whose checksum matches what the device will report
fn config_text(config: &DummyConfig, records: Vec<ConfigRecord>) -> String {
    let mut reference = DummyController::new(config.clone()).unwrap();
    for r in &records {
        reference.set_object(r.object_type, r.instance as usize, &r.data);
    }
    let dir = reference.directory();
    RawConfig {
        info: dir.info().to_bytes(),
        info_crc: dir.info_crc(),
        config_crc: reference.config_crc(),
        records,
    }
    .to_string()
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut f = (body.len() as u16).to_be_bytes().to_vec();
    f.extend_from_slice(body);
    f
}

fn image() -> Vec<u8> {
    let mut image = frame(&[0xF0, 0x01, 0x02, 0x93]);
    image.extend(frame(&[0xF1, 0x03, 0x04, 0x05, 0x06, 0xA7]));
    image.extend(frame(&[0xF2, 0x5C]));
    image
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

#[test]
fn test_plain_initialize() {
    let ctl = plain();
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
    let dummy = ctl.bus();
    assert_eq!(
        &dummy.object(object::GEN_POWER_T7, 0).unwrap()[..2],
        &[power::DEFAULT_IDLE, power::DEFAULT_ACTIVE]
    );
    assert_eq!(dummy.object(object::SPT_COMMSCONFIG_T18, 0).unwrap()[0], comms::RETRIGEN);
    assert_eq!(dummy.pending_messages(), 0);
}

#[test]
fn test_crc_initialize() {
    let ctl = crc();
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
    // RETRIGEN is only managed in plain mode
    assert_eq!(ctl.bus().object(object::SPT_COMMSCONFIG_T18, 0).unwrap()[0], 0);
    assert_eq!(ctl.bus().counters().comm_errors, 0);
}

#[test]
fn test_status_and_touch_routed() {
    let mut ctl = plain();
    let t6 = ctl.directory().unwrap().report_range(object::GEN_COMMAND_T6).unwrap().min;
    ctl.bus_mut().push_message(&[t6, 0x00, 0x11, 0x22, 0x33]);
    ctl.bus_mut().push_touch(0, 0x123, 0x456);

    let mut sink = Recorder::default();
    let report = ctl.handle_interrupt(&mut sink).unwrap();

    assert_eq!(report.processed, 2);
    let others: Vec<_> = sink
        .messages
        .iter()
        .filter(|m| !matches!(m.decoded, Decoded::Status { .. }))
        .collect();
    assert_eq!(others.len(), 1);
    match &others[0].decoded {
        Decoded::Touch(touch) => {
            assert_eq!(touch.id, 0);
            assert_eq!((touch.x, touch.y), (0x123, 0x456));
        }
        other => panic!("expected a touch, got {:?}", other),
    }
    assert_eq!(sink.syncs, vec![InputDevice::Primary]);
    assert_eq!(ctl.config_crc(), 0x332211);
}

#[test]
fn test_crc_contact_routed() {
    let mut ctl = crc();
    ctl.bus_mut().push_touch(1, 100, 200);
    ctl.bus_mut().push_touch(2, 300, 400);

    let mut sink = Recorder::default();
    let report = ctl.handle_interrupt(&mut sink).unwrap();
    assert_eq!(report.processed, 2);
    assert!(!report.resync_needed);
    match &sink.messages[0].decoded {
        Decoded::Contact(c) => {
            assert_eq!(c.device, InputDevice::Primary);
            assert_eq!(c.id, 1);
            assert!(c.detect);
            assert_eq!((c.x, c.y), (100, 200));
        }
        other => panic!("expected a contact, got {:?}", other),
    }
    // Framing CRC is not part of the record
    assert_eq!(sink.messages[0].data.len(), 9);
    assert_eq!(sink.syncs, vec![InputDevice::Primary]);
}

#[test]
fn test_crc_write_read_back() {
    let mut ctl = crc();
    let data: Vec<u8> = (0..24).collect();
    let frames_before = ctl.bus().counters().crc_frames;

    ctl.write_object(object::TOUCH_MULTITOUCHSCREEN_T100, 0, 0, &data).unwrap();
    assert!(ctl.bus().counters().crc_frames >= frames_before + 3);
    assert_eq!(ctl.read_object(object::TOUCH_MULTITOUCHSCREEN_T100, 0).unwrap(), data);
    assert_eq!(ctl.bus().counters().comm_errors, 0);
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
}

#[test]
fn test_write_object_bounds() {
    let mut ctl = plain();
    let err = ctl
        .write_object(object::GEN_POWER_T7, 0, 2, &[1, 2, 3])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    let err = ctl.read_object(object::SPT_MESSAGECOUNT_T144, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_apply_config_then_skip() {
    let mut ctl = plain();
    let text = config_text(&DummyConfig::plain(), plain_records());

    let report = match ctl.apply_config(&text).unwrap() {
        ApplyOutcome::Applied(report) => report,
        other => panic!("expected apply, got {:?}", other),
    };
    assert_eq!(report.objects_written, 9);
    assert_eq!(report.objects_skipped, 0);
    assert!(report.crc_matches);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });

    let dummy = ctl.bus();
    assert_eq!(dummy.object(object::GEN_ACQUIRE_T8, 0).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(dummy.counters().backups, 1);
    assert_eq!(ctl.config_crc(), ctl.bus().config_crc());

    let writes = ctl.bus().counters().data_writes;
    let second = ctl.apply_config(&text).unwrap();
    assert!(matches!(second, ApplyOutcome::Skipped(SkipReason::UpToDate { .. })));
    assert_eq!(ctl.bus().counters().data_writes, writes);
}

#[test]
fn test_apply_config_skips_absent_object() {
    let mut ctl = plain();
    let records = vec![
        record(object::GEN_POWER_T7, &[100, 20, 5, 0]),
        record(object::GEN_ACQUIRE_T8, &[7; 10]),
        record(99, &[0xEE; 5]),
        record(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, &[0x66; 16]),
    ];
    let text = config_text(&DummyConfig::plain(), records);

    let report = match ctl.apply_config(&text).unwrap() {
        ApplyOutcome::Applied(report) => report,
        other => panic!("expected apply, got {:?}", other),
    };
    assert_eq!(report.objects_skipped, 1);
    assert_eq!(report.skipped_bytes, 17 + 5);
    assert_eq!(
        ctl.bus().object(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 0).unwrap(),
        &[0x66; 16]
    );
}

#[test]
fn test_apply_config_incompatible() {
    let mut ctl = plain();
    let text = config_text(&DummyConfig::plain().with_variant(0x02), plain_records());
    let writes = ctl.bus().counters().data_writes;

    let err = ctl.apply_config(&text).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compatibility);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
    // Only the checksum refresh reached the device
    assert!(ctl.bus().counters().data_writes <= writes + 1);
    assert_eq!(ctl.bus().counters().backups, 0);
}

#[test]
fn test_apply_config_malformed() {
    let mut ctl = plain();
    let writes = ctl.bus().counters().data_writes;
    let err = ctl
        .apply_config("OBP_RAW V1\n81 01 20 AA 10 0E 0C\n0\n0\n0007 0000 0004 01 02")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(ctl.bus().counters().data_writes, writes);
}

#[test]
fn test_clear_config() {
    let mut ctl = plain();
    ctl.write_object(object::GEN_ACQUIRE_T8, 0, 0, &[9; 10]).unwrap();
    ctl.clear_config().unwrap();
    assert_eq!(ctl.bus().object(object::GEN_ACQUIRE_T8, 0).unwrap(), &[0; 10]);
    assert_eq!(ctl.bus().counters().backups, 1);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
}

#[test]
fn test_t6_commands() {
    let mut ctl = plain();
    ctl.calibrate().unwrap();
    assert_eq!(ctl.bus().counters().calibrations, 1);

    ctl.backup().unwrap();
    assert_eq!(ctl.bus().counters().backups, 1);
    assert_eq!(ctl.config_crc(), ctl.bus().config_crc());

    let resets = ctl.bus().counters().resets;
    ctl.soft_reset().unwrap();
    assert_eq!(ctl.bus().counters().resets, resets + 1);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
}

#[test]
fn test_crc_soft_reset_restarts_sequence() {
    let mut ctl = crc();
    ctl.read_object(object::GEN_POWER_T7, 0).unwrap();
    ctl.soft_reset().unwrap();
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
    assert_eq!(ctl.bus().counters().comm_errors, 0);
}

#[test]
fn test_power_modes() {
    let mut ctl = plain();
    ctl.set_power_mode(PowerMode::DeepSleep).unwrap();
    assert_eq!(&ctl.bus().object(object::GEN_POWER_T7, 0).unwrap()[..2], &[0, 0]);
    ctl.set_power_mode(PowerMode::Run).unwrap();
    assert_eq!(
        &ctl.bus().object(object::GEN_POWER_T7, 0).unwrap()[..2],
        &[power::DEFAULT_IDLE, power::DEFAULT_ACTIVE]
    );
}

#[test]
fn test_dump_objects() {
    let mut ctl = plain();
    let dumps = ctl.dump_objects().unwrap();
    assert!(dumps.iter().any(|d| d.object_type == object::TOUCH_MULTI_T9 && d.data.len() == 36));
    assert!(dumps.iter().all(|d| d.object_type != object::GEN_MESSAGE_T5));
    assert!(dumps.iter().all(|d| d.object_type != object::SPT_MESSAGECOUNT_T44));
}

#[test]
fn test_resync_after_corrupt_tables() {
    let mut ctl = crc();
    ctl.bus_mut().corrupt_table_reads(3);
    assert_eq!(ctl.resync().unwrap(), 4);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
    assert_eq!(ctl.sync_state(), SyncState::InSync);
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
    ctl.read_object(object::GEN_POWER_T7, 0).unwrap();
}

#[test]
fn test_resync_exhausted() {
    let mut ctl = controller(DummyConfig::crc(), EngineConfig::new().with_resync_attempts(5));
    ctl.bus_mut().corrupt_table_reads(10);
    let err = ctl.resync().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(ctl.state(), SessionState::NotReady);
    assert_eq!(ctl.sync_state(), SyncState::Resyncing);

    // No second attempt until re-initialised
    let frames = ctl.bus().counters().crc_frames;
    assert_eq!(ctl.resync().unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(ctl.bus().counters().crc_frames, frames);

    // Interrupts are ignored until re-initialised
    ctl.bus_mut().push_touch(0, 1, 1);
    assert_eq!(ctl.handle_interrupt(&mut NullSink).unwrap().processed, 0);
    ctl.bus_mut().corrupt_table_reads(0);
    ctl.initialize().unwrap();
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
    assert_eq!(ctl.sync_state(), SyncState::InSync);
}

#[test]
fn test_resync_refused_in_bootloader() {
    let dummy = DummyController::in_bootloader(DummyConfig::crc()).unwrap();
    let mut ctl = Controller::new(dummy, 0x4a, EngineConfig::default());
    ctl.initialize().unwrap();
    assert_eq!(ctl.state(), SessionState::Bootloader);

    assert_eq!(ctl.resync().unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(ctl.state(), SessionState::Bootloader);
    assert_eq!(ctl.sync_state(), SyncState::InSync);
}

#[test]
fn test_write_past_address_map_rejected() {
    let mut config = DummyConfig::plain();
    let last = config.objects.len() - 1;
    config.objects[last] = ObjectEntry::new(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 0xFFF8, 16, 1, 0);
    let mut ctl = controller(config, EngineConfig::default());
    let writes = ctl.bus().counters().data_writes;

    let err = ctl
        .write_object(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 0, 8, &[1; 8])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    let err = ctl.write_register(0xFFFC, &[0; 8]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(ctl.bus().counters().data_writes, writes);

    ctl.write_object(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 0, 0, &[2; 8])
        .unwrap();
    assert_eq!(
        &ctl.bus().object(object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71, 0).unwrap()[..8],
        &[2; 8]
    );
}

#[test]
fn test_comserr_storm_resyncs() {
    let mut ctl = crc();
    ctl.bus_mut().inject_comserr(5);
    let report = ctl.handle_interrupt(&mut NullSink).unwrap();
    assert!(report.resync_needed);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
}

#[test]
fn test_message_crc_errors_resync() {
    let mut ctl = crc();
    for i in 0..4 {
        ctl.bus_mut().push_touch(i, 10, 10);
    }
    ctl.bus_mut().corrupt_message_reads(4);
    let mut sink = Recorder::default();
    let report = ctl.handle_interrupt(&mut sink).unwrap();
    assert!(report.resync_needed);
    assert!(sink.messages.is_empty());
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
}

#[test]
fn test_resync_disabled_only_logs() {
    let mut ctl = controller(DummyConfig::crc(), EngineConfig::new().with_resync(false));
    ctl.bus_mut().inject_comserr(6);
    let report = ctl.handle_interrupt(&mut NullSink).unwrap();
    assert!(!report.resync_needed);
    assert_eq!(report.processed, 6);
}

#[test]
fn test_capture() {
    let mut ctl = plain();
    ctl.set_capture(true);
    ctl.bus_mut().push_touch(0, 5, 5);
    ctl.handle_interrupt(&mut NullSink).unwrap();
    let captured = ctl.take_capture();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].len(), 9);
    assert!(ctl.take_capture().is_empty());
}

#[test]
fn test_flash_with_frame_retries() {
    let mut ctl = plain();
    let image = image();
    ctl.bus_mut().fail_frames(2);

    let report = ctl.flash_firmware(&image, &mut NoProgress).unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(report.retries, 2);
    assert_eq!(report.bytes, image.len());

    let dummy = ctl.bus();
    let frames = split_frames(&image);
    assert!(!dummy.is_in_bootloader());
    // Each retry resends the first frame byte for byte
    assert_eq!(dummy.rejected_frames(), &[frames[0].clone(), frames[0].clone()]);
    assert_eq!(dummy.received_frames(), frames.as_slice());
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
}

#[test]
fn test_flash_aborts_after_retry_bound() {
    let mut ctl = controller(DummyConfig::plain(), EngineConfig::new().with_frame_retries(3));
    ctl.bus_mut().fail_frames(10);
    let err = ctl.flash_firmware(&image(), &mut NoProgress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(ctl.state(), SessionState::Bootloader);
    assert_eq!(ctl.bootloader_address(), Some(0x24));
    assert_eq!(ctl.bus().rejected_frames().len(), 4);
    assert!(ctl.bus().rejected_frames().iter().all(|f| *f == split_frames(&image())[0]));

    // Interrupts are ignored while in the bootloader
    assert_eq!(ctl.handle_interrupt(&mut NullSink).unwrap().processed, 0);
}

#[test]
fn test_flash_rejects_hex_text() {
    let mut ctl = plain();
    let writes = ctl.bus().counters().data_writes;
    let err = ctl
        .flash_firmware(b"01020304AABBCCDD\n", &mut NoProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(ctl.bus().counters().data_writes, writes);
    assert!(!ctl.bus().is_in_bootloader());
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
}

#[test]
fn test_initialize_stuck_in_bootloader() {
    let dummy = DummyController::in_bootloader(DummyConfig::plain()).unwrap();
    let mut ctl = Controller::new(dummy, 0x4a, EngineConfig::default());
    ctl.initialize().unwrap();
    assert_eq!(ctl.state(), SessionState::Bootloader);
    assert_eq!(ctl.bootloader_address(), Some(0x24));

    let report = ctl.flash_firmware(&image(), &mut NoProgress).unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: false });
    assert!(ctl.directory().is_some());
}

#[test]
fn test_crc_device_flash_uses_alternate_address() {
    let dummy = DummyController::in_bootloader(DummyConfig::crc()).unwrap();
    let mut ctl = Controller::new(dummy, 0x4a, EngineConfig::default());
    ctl.initialize().unwrap();
    assert_eq!(ctl.state(), SessionState::Bootloader);
    assert_eq!(ctl.bootloader_address(), Some(0x26));

    ctl.flash_firmware(&image(), &mut NoProgress).unwrap();
    assert_eq!(ctl.state(), SessionState::Normal { crc_framed: true });
    assert_eq!(ctl.tx_seq(), ctl.bus().expected_seq());
}

#[test]
fn test_initialize_without_device() {
    let dummy = DummyController::new(DummyConfig::plain().with_address(0x4b)).unwrap();
    let mut ctl = Controller::new(dummy, 0x4a, EngineConfig::default());
    let err = ctl.initialize().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bus);
    assert_eq!(ctl.state(), SessionState::NotReady);
}

fn split_frames(data: &[u8]) -> Vec<Vec<u8>> {
    let image = mxt_core::bootloader::FirmwareImage::parse(data).unwrap();
    (0..image.frame_count()).map(|i| image.frame(i).to_vec()).collect()
}
