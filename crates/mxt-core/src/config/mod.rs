//! Configuration apply engine
//!
//! A configuration image is checked against the live directory, laid out
//! in a shadow of the device's configuration memory and checksummed. The
//! shadow starts right after the info block. Records for objects the
//! device lacks, or for volatile objects, are parsed but never written;
//! their bytes are accounted as skipped, which shifts the shadow position
//! of every following object and shrinks the checksummed region.
//!
//! The bus side of applying a plan (writes, backup, reset) lives in
//! [`Controller::apply_config`](crate::Controller::apply_config).

pub mod raw;

pub use raw::{ConfigRecord, RawConfig, MAGIC};

use crate::crc::crc24;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::protocol::{is_volatile, object};

/// Why an apply did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The device already runs a configuration with the file's checksum
    UpToDate {
        /// Shared checksum
        config_crc: u32,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpToDate { config_crc } => {
                write!(f, "up to date (config CRC 0x{:06X})", config_crc)
            }
        }
    }
}

/// Statistics of an applied configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    /// Object instances written
    pub objects_written: usize,
    /// Records skipped as absent or volatile
    pub objects_skipped: usize,
    /// Bytes written to the device
    pub bytes_written: usize,
    /// Bytes excluded from the shadow
    pub skipped_bytes: usize,
    /// Checksum calculated over the shadow, if a start object exists
    pub calculated_crc: Option<u32>,
    /// Whether the calculated checksum equals the file's
    pub crc_matches: bool,
}

/// Result of [`Controller::apply_config`](crate::Controller::apply_config)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The configuration was written, backed up and the device reset
    Applied(ApplyReport),
    /// Nothing was written
    Skipped(SkipReason),
}

/// One object instance to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Object type
    pub object_type: u8,
    /// Instance
    pub instance: u16,
    /// Device register of the instance
    pub register: u16,
    /// Position of the instance in the shadow
    pub shadow_offset: usize,
    /// Bytes to write, truncated or zero padded to the device's object size
    pub data: Vec<u8>,
}

/// A configuration laid out against a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPlan {
    /// Device address the shadow starts at
    pub start_offset: usize,
    /// Shadow of configuration memory
    pub shadow: Vec<u8>,
    /// Bytes of the shadow covered by the checksum
    pub meaningful_len: usize,
    /// Bytes skipped before and between placed objects
    pub skipped_bytes: usize,
    /// Records not placed
    pub skipped_records: usize,
    /// Instances to write, in file order
    pub placements: Vec<Placement>,
}

/// Check a parsed file against the live device
///
/// Returns the reason to skip when the device already holds this
/// configuration. Family, variant and info block checksum must match.
pub fn check(raw: &RawConfig, directory: &Directory, device_config_crc: u32) -> Result<Option<SkipReason>> {
    let info = directory.info();
    if raw.family_id() != info.family_id {
        return Err(Error::Compatibility(format!(
            "family id mismatch: file 0x{:02X}, device 0x{:02X}",
            raw.family_id(),
            info.family_id
        )));
    }
    if raw.variant_id() != info.variant_id {
        return Err(Error::Compatibility(format!(
            "variant id mismatch: file 0x{:02X}, device 0x{:02X}",
            raw.variant_id(),
            info.variant_id
        )));
    }
    if raw.info_crc != directory.info_crc() {
        return Err(Error::Compatibility(format!(
            "info block CRC mismatch: file 0x{:06X}, device 0x{:06X}",
            raw.info_crc,
            directory.info_crc()
        )));
    }

    if raw.config_crc == 0 || device_config_crc == 0 {
        log::info!("config: CRC zero, attempting to apply config");
        return Ok(None);
    }
    if raw.config_crc == device_config_crc {
        log::info!(
            "config: file CRC 0x{:06X} same as device, no update required",
            device_config_crc
        );
        return Ok(Some(SkipReason::UpToDate {
            config_crc: device_config_crc,
        }));
    }
    log::info!(
        "config: device CRC 0x{:06X} does not match file CRC 0x{:06X}, updating",
        device_config_crc,
        raw.config_crc
    );
    Ok(None)
}

/// First object covered by the config checksum
pub fn crc_start(directory: &Directory) -> Option<u16> {
    [
        object::GEN_POWER_T7,
        object::PROCI_LENSBENDING_T65,
        object::SPT_DYNAMICCONFIGURATIONCONTAINER_T71,
    ]
    .iter()
    .find_map(|&t| directory.address(t))
}

/// Lay out `raw` against `directory`
pub fn plan(raw: &RawConfig, directory: &Directory) -> Result<ConfigPlan> {
    let start = directory.config_start();
    let region = directory.mem_size().saturating_sub(start);
    let mut shadow = vec![0u8; region];
    let mut meaningful_len = region;
    let mut skipped = 0usize;
    let mut skipped_records = 0;
    let mut placements = Vec::new();

    // The shadow begins at the first object of the file
    if let Some(first) = raw.records.first() {
        if let Some(obj) = directory.get(first.object_type) {
            let addr = obj.start_address as usize;
            if addr > start {
                skipped = addr - start;
                meaningful_len = meaningful_len.saturating_sub(skipped);
            }
            log::debug!("config: first object T{}, initial skip {}", first.object_type, skipped);
        }
    }

    for record in &raw.records {
        let obj = match directory.get(record.object_type) {
            Some(obj) if !is_volatile(record.object_type) => obj,
            _ => {
                log::info!(
                    "config: skipping object T{} instance {}",
                    record.object_type,
                    record.instance
                );
                skipped += record.data.len();
                meaningful_len = meaningful_len.saturating_sub(record.data.len());
                skipped_records += 1;
                continue;
            }
        };

        let size = obj.size();
        if record.data.len() > size {
            log::warn!(
                "config: discarding {} byte(s) in T{}",
                record.data.len() - size,
                record.object_type
            );
        } else if size > record.data.len() {
            log::warn!(
                "config: zeroing {} byte(s) in T{}",
                size - record.data.len(),
                record.object_type
            );
        }

        if record.instance as usize >= obj.instances() {
            return Err(Error::format(format!(
                "T{} instance {} exceeds {} instances",
                record.object_type,
                record.instance,
                obj.instances()
            )));
        }

        let register = obj.address_of(record.instance as usize);
        let shadow_offset = (register as usize)
            .checked_sub(start + skipped)
            .ok_or_else(|| {
                Error::format(format!(
                    "T{} at {} falls before the config region (skip {})",
                    record.object_type, register, skipped
                ))
            })?;

        let copied = record.data.len().min(size);
        let end = shadow_offset + copied;
        if end > shadow.len() {
            return Err(Error::format(format!(
                "T{} at {} overruns the config region",
                record.object_type, register
            )));
        }
        shadow[shadow_offset..end].copy_from_slice(&record.data[..copied]);

        let mut data = record.data[..copied].to_vec();
        data.resize(size, 0);
        placements.push(Placement {
            object_type: record.object_type,
            instance: record.instance,
            register,
            shadow_offset,
            data,
        });
    }

    Ok(ConfigPlan {
        start_offset: start,
        shadow,
        meaningful_len,
        skipped_bytes: skipped,
        skipped_records,
        placements,
    })
}

impl ConfigPlan {
    /// CRC24 of the shadow from `crc_start` to the end of the meaningful region
    ///
    /// Returns `None` when `crc_start` does not lie inside the shadow.
    pub fn calculate_crc(&self, crc_start: u16) -> Option<u32> {
        let crc_start = crc_start as usize;
        if crc_start <= self.start_offset {
            return None;
        }
        let from = crc_start.checked_sub(self.start_offset + self.skipped_bytes)?;
        let to = self.meaningful_len.min(self.shadow.len());
        if from > to {
            return None;
        }
        Some(crc24(&self.shadow[from..to]))
    }

    /// Total bytes the plan writes
    pub fn bytes_to_write(&self) -> usize {
        self.placements.iter().map(|p| p.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{encode_info_block, InfoBlock, ObjectEntry};

    const HEADER: InfoBlock = InfoBlock {
        family_id: 0x81,
        variant_id: 0x01,
        version: 0x10,
        build: 0xAA,
        matrix_x: 16,
        matrix_y: 14,
        object_count: 0,
    };

    // Config region starts at 7 + 5 * 6 + 3 = 40
    fn directory() -> Directory {
        let objects = vec![
            ObjectEntry::new(object::GEN_MESSAGE_T5, 40, 10, 1, 0),
            ObjectEntry::new(object::GEN_COMMAND_T6, 50, 6, 1, 1),
            ObjectEntry::new(object::GEN_POWER_T7, 56, 4, 1, 0),
            ObjectEntry::new(object::GEN_ACQUIRE_T8, 60, 10, 1, 0),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 70, 8, 2, 10),
        ];
        Directory::parse(&encode_info_block(&HEADER, &objects)).unwrap()
    }

    fn raw(dir: &Directory, records: Vec<ConfigRecord>) -> RawConfig {
        let mut info = dir.info().to_bytes();
        info[6] = dir.info().object_count;
        RawConfig {
            info,
            info_crc: dir.info_crc(),
            config_crc: 0,
            records,
        }
    }

    fn record(object_type: u8, instance: u16, data: &[u8]) -> ConfigRecord {
        ConfigRecord {
            object_type,
            instance,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_check_compatibility() {
        let dir = directory();
        let mut cfg = raw(&dir, vec![]);
        assert_eq!(check(&cfg, &dir, 0).unwrap(), None);

        cfg.config_crc = 0x123456;
        assert_eq!(
            check(&cfg, &dir, 0x123456).unwrap(),
            Some(SkipReason::UpToDate { config_crc: 0x123456 })
        );
        assert_eq!(check(&cfg, &dir, 0x654321).unwrap(), None);

        cfg.info[1] = 0x02;
        assert_eq!(check(&cfg, &dir, 0).unwrap_err().kind(), crate::ErrorKind::Compatibility);

        let mut cfg = raw(&dir, vec![]);
        cfg.info_crc ^= 1;
        assert_eq!(check(&cfg, &dir, 0).unwrap_err().kind(), crate::ErrorKind::Compatibility);
    }

    #[test]
    fn test_plan_volatile_records_skipped() {
        let dir = directory();
        let cfg = raw(
            &dir,
            vec![
                record(object::GEN_COMMAND_T6, 0, &[0; 6]),
                record(object::GEN_POWER_T7, 0, &[1, 2, 3, 4]),
            ],
        );
        let plan = plan(&cfg, &dir).unwrap();
        // T6 sits 10 bytes into the region, then its 6 bytes are skipped too
        assert_eq!(plan.skipped_bytes, 16);
        assert_eq!(plan.skipped_records, 1);
        assert_eq!(plan.placements.len(), 1);
        assert_eq!(plan.placements[0].shadow_offset, 0);
        assert_eq!(plan.meaningful_len, 46 - 16);
        assert_eq!(&plan.shadow[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_skip_accounting_shifts_later_objects() {
        let dir = directory();
        let t9 = [0xA0; 8];
        let with_absent = raw(
            &dir,
            vec![
                record(object::GEN_POWER_T7, 0, &[1, 2, 3, 4]),
                record(99, 0, &[0xEE; 5]),
                record(object::TOUCH_MULTI_T9, 0, &t9),
            ],
        );
        let without = raw(
            &dir,
            vec![
                record(object::GEN_POWER_T7, 0, &[1, 2, 3, 4]),
                record(object::TOUCH_MULTI_T9, 0, &t9),
            ],
        );

        let shifted = plan(&with_absent, &dir).unwrap();
        let naive = plan(&without, &dir).unwrap();
        let offset = |p: &ConfigPlan| {
            p.placements
                .iter()
                .find(|pl| pl.object_type == object::TOUCH_MULTI_T9)
                .unwrap()
                .shadow_offset
        };
        assert_eq!(offset(&naive), 14);
        assert_eq!(offset(&naive) - offset(&shifted), 5);
        // Real registers are unaffected
        assert_eq!(shifted.placements[1].register, 70);
        assert_eq!(shifted.skipped_records, 1);
        assert_eq!(shifted.meaningful_len, naive.meaningful_len - 5);
    }

    #[test]
    fn test_size_mismatch_tolerated() {
        let dir = directory();
        let cfg = raw(
            &dir,
            vec![
                record(object::GEN_POWER_T7, 0, &[1, 2, 3, 4, 5, 6]),
                record(object::GEN_ACQUIRE_T8, 0, &[7, 8]),
            ],
        );
        let plan = plan(&cfg, &dir).unwrap();
        assert_eq!(plan.placements[0].data, vec![1, 2, 3, 4]);
        assert_eq!(plan.placements[1].data, vec![7, 8, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(plan.bytes_to_write(), 14);
    }

    #[test]
    fn test_instance_out_of_range() {
        let dir = directory();
        let cfg = raw(&dir, vec![record(object::TOUCH_MULTI_T9, 2, &[0; 8])]);
        assert_eq!(plan(&cfg, &dir).unwrap_err().kind(), crate::ErrorKind::Format);

        let cfg = raw(&dir, vec![record(object::TOUCH_MULTI_T9, 1, &[0; 8])]);
        let plan = plan(&cfg, &dir).unwrap();
        assert_eq!(plan.placements[0].register, 78);
    }

    #[test]
    fn test_crc_over_meaningful_region() {
        let dir = directory();
        let cfg = raw(
            &dir,
            vec![
                record(object::GEN_POWER_T7, 0, &[1, 2, 3, 4]),
                record(object::GEN_ACQUIRE_T8, 0, &[5; 10]),
                record(object::TOUCH_MULTI_T9, 0, &[6; 8]),
                record(object::TOUCH_MULTI_T9, 1, &[7; 8]),
            ],
        );
        let plan = plan(&cfg, &dir).unwrap();
        let start = crc_start(&dir).unwrap();
        assert_eq!(start, 56);

        let mut expected = vec![1, 2, 3, 4];
        expected.extend_from_slice(&[5; 10]);
        expected.extend_from_slice(&[6; 8]);
        expected.extend_from_slice(&[7; 8]);
        assert_eq!(plan.calculate_crc(start), Some(crc24(&expected)));
    }
}
