//! Object directory
//!
//! The controller describes itself at address 0: a 7-byte ID header, one
//! 6-byte entry per object and a CRC24 over both. Parsing the table yields
//! the address of every object, the report-id range each one owns and the
//! size of the writable register space.

use crate::crc::{crc24, le24};
use crate::error::{Error, Result};
use crate::protocol::{info, object};

/// The 7-byte ID header of the info block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoBlock {
    /// Controller family
    pub family_id: u8,
    /// Variant within the family
    pub variant_id: u8,
    /// Firmware version, major in the high nibble
    pub version: u8,
    /// Firmware build
    pub build: u8,
    /// X matrix size
    pub matrix_x: u8,
    /// Y matrix size
    pub matrix_y: u8,
    /// Number of object table entries
    pub object_count: u8,
}

impl InfoBlock {
    /// Decode the ID header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < info::HEADER_SIZE {
            return Err(Error::protocol(format!(
                "info header too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            family_id: bytes[0],
            variant_id: bytes[1],
            version: bytes[2],
            build: bytes[3],
            matrix_x: bytes[4],
            matrix_y: bytes[5],
            object_count: bytes[6],
        })
    }

    /// Encode the ID header
    pub fn to_bytes(&self) -> [u8; info::HEADER_SIZE] {
        [
            self.family_id,
            self.variant_id,
            self.version,
            self.build,
            self.matrix_x,
            self.matrix_y,
            self.object_count,
        ]
    }

    /// Size of the object table plus its checksum
    pub fn table_size(&self) -> usize {
        self.object_count as usize * info::OBJECT_ENTRY_SIZE + info::CHECKSUM_SIZE
    }

    /// Firmware version as `major.minor.build`
    pub fn firmware(&self) -> String {
        format!(
            "{}.{}.{:02X}",
            self.version >> 4,
            self.version & 0x0F,
            self.build
        )
    }
}

impl std::fmt::Display for InfoBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Family: 0x{:02X} Variant: 0x{:02X} Firmware V{} Objects: {}",
            self.family_id,
            self.variant_id,
            self.firmware(),
            self.object_count
        )
    }
}

/// Inclusive report-id interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReportIdRange {
    /// First id
    pub min: u8,
    /// Last id
    pub max: u8,
}

impl ReportIdRange {
    /// Whether `report_id` falls inside the range
    pub fn contains(&self, report_id: u8) -> bool {
        (self.min..=self.max).contains(&report_id)
    }

    /// Number of ids in the range
    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    /// Ranges always hold at least one id
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl std::fmt::Display for ReportIdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// One object table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object type
    pub object_type: u8,
    /// Address of the first instance
    pub start_address: u16,
    /// Instance size minus one, as transmitted
    pub size_minus_one: u8,
    /// Instance count minus one, as transmitted
    pub instances_minus_one: u8,
    /// Report ids per instance
    pub report_ids: u8,
    /// Report ids owned by all instances, if any
    pub report_id_range: Option<ReportIdRange>,
}

impl ObjectEntry {
    /// Build an entry from natural sizes
    ///
    /// `size` and `instances` must be between 1 and 256.
    pub fn new(object_type: u8, start_address: u16, size: usize, instances: usize, report_ids: u8) -> Self {
        Self {
            object_type,
            start_address,
            size_minus_one: (size.clamp(1, 256) - 1) as u8,
            instances_minus_one: (instances.clamp(1, 256) - 1) as u8,
            report_ids,
            report_id_range: None,
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            object_type: bytes[0],
            start_address: u16::from_le_bytes([bytes[1], bytes[2]]),
            size_minus_one: bytes[3],
            instances_minus_one: bytes[4],
            report_ids: bytes[5],
            report_id_range: None,
        }
    }

    /// Encode the 6-byte table entry
    pub fn encode(&self) -> [u8; info::OBJECT_ENTRY_SIZE] {
        let addr = self.start_address.to_le_bytes();
        [
            self.object_type,
            addr[0],
            addr[1],
            self.size_minus_one,
            self.instances_minus_one,
            self.report_ids,
        ]
    }

    /// Size of one instance in bytes
    pub fn size(&self) -> usize {
        self.size_minus_one as usize + 1
    }

    /// Number of instances
    pub fn instances(&self) -> usize {
        self.instances_minus_one as usize + 1
    }

    /// Address of instance `instance`
    pub fn address_of(&self, instance: usize) -> u16 {
        self.start_address
            .wrapping_add((instance * self.size()) as u16)
    }

    /// One past the last byte of the last instance
    pub fn end(&self) -> usize {
        self.start_address as usize + self.size() * self.instances()
    }

    /// Report ids of the first instance only
    pub fn first_instance_range(&self) -> Option<ReportIdRange> {
        self.report_id_range.map(|r| ReportIdRange {
            min: r.min,
            max: r.min + self.report_ids - 1,
        })
    }
}

/// Build a complete info block (header, table and CRC24) from its parts
pub fn encode_info_block(header: &InfoBlock, objects: &[ObjectEntry]) -> Vec<u8> {
    let mut raw = header.to_bytes().to_vec();
    raw[6] = objects.len() as u8;
    for entry in objects {
        raw.extend_from_slice(&entry.encode());
    }
    let crc = crc24(&raw);
    raw.extend_from_slice(&crc.to_le_bytes()[..3]);
    raw
}

/// Where messages carrying a report id are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Command processor status and config checksum (T6)
    Status,
    /// Multiple touch touchscreen, first instance (T9)
    Touch,
    /// Multiple touch touchscreen (T100)
    MultiTouch,
    /// Key array (T15)
    KeyArray,
    /// GPIO/PWM (T19)
    Gpio,
    /// Touch suppression (T42)
    TouchSuppression,
    /// Noise suppression (T48)
    Noise,
    /// Symbol gesture processor (T92)
    SymbolGesture,
    /// Touch sequence processor (T93)
    TouchSequence,
    /// Enhanced diagnostic records (T33)
    Diagnostic,
}

impl Route {
    /// Route for messages of `object_type`, if the engine decodes them
    pub fn for_object(object_type: u8) -> Option<Self> {
        use object::*;
        let route = match object_type {
            GEN_COMMAND_T6 => Self::Status,
            TOUCH_MULTI_T9 => Self::Touch,
            TOUCH_MULTITOUCHSCREEN_T100 => Self::MultiTouch,
            TOUCH_KEYARRAY_T15 => Self::KeyArray,
            SPT_GPIOPWM_T19 => Self::Gpio,
            PROCI_TOUCHSUPPRESSION_T42 => Self::TouchSuppression,
            PROCG_NOISESUPPRESSION_T48 => Self::Noise,
            PROCI_SYMBOLGESTUREPROCESSOR_T92 => Self::SymbolGesture,
            PROCI_TOUCHSEQUENCELOGGER_T93 => Self::TouchSequence,
            SPT_ENH_DIAG_CTRL_T33 => Self::Diagnostic,
            _ => return None,
        };
        Some(route)
    }
}

/// A report-id range and its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Ids delivered to `route`
    pub range: ReportIdRange,
    /// Destination
    pub route: Route,
}

/// Sorted, disjoint report-id ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Build a table, rejecting overlapping ranges
    pub fn new(mut entries: Vec<RouteEntry>) -> Result<Self> {
        entries.sort_by_key(|e| e.range.min);
        for entry in &entries {
            if entry.range.min > entry.range.max {
                return Err(Error::protocol(format!(
                    "inverted report id range {} for {:?}",
                    entry.range, entry.route
                )));
            }
        }
        for pair in entries.windows(2) {
            if pair[0].range.max >= pair[1].range.min {
                return Err(Error::protocol(format!(
                    "report id ranges overlap: {:?} {} and {:?} {}",
                    pair[0].route, pair[0].range, pair[1].route, pair[1].range
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Find the destination of `report_id`
    pub fn lookup(&self, report_id: u8) -> Option<&RouteEntry> {
        let idx = self.entries.partition_point(|e| e.range.max < report_id);
        self.entries
            .get(idx)
            .filter(|e| e.range.contains(report_id))
    }

    /// Range assigned to `route`
    pub fn range_of(&self, route: Route) -> Option<ReportIdRange> {
        self.entries
            .iter()
            .find(|e| e.route == route)
            .map(|e| e.range)
    }

    /// All entries in ascending id order
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

/// Parsed and validated object directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    info: InfoBlock,
    info_crc: u32,
    objects: Vec<ObjectEntry>,
    max_report_id: u8,
    mem_size: usize,
    message_size: usize,
    crc_framed: bool,
    routes: RouteTable,
}

impl Directory {
    /// Parse a complete info block: header, object table and CRC24
    ///
    /// The checksum is validated before anything else is trusted; a
    /// declared checksum of zero is rejected as well, since devices that
    /// do not speak the object protocol read back as zeros.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let info = InfoBlock::parse(raw)?;
        let table_end = info::HEADER_SIZE + info.object_count as usize * info::OBJECT_ENTRY_SIZE;
        let expected = table_end + info::CHECKSUM_SIZE;
        if raw.len() < expected {
            return Err(Error::protocol(format!(
                "info block truncated: {} of {} bytes",
                raw.len(),
                expected
            )));
        }

        let declared = le24(&raw[table_end..expected]);
        let calculated = crc24(&raw[..table_end]);
        if declared == 0 || declared != calculated {
            return Err(Error::Crc(format!(
                "info block CRC calculated=0x{:06X} read=0x{:06X}",
                calculated, declared
            )));
        }

        Self::from_table(info, declared, &raw[info::HEADER_SIZE..table_end])
    }

    /// Build the directory from an already validated table
    fn from_table(info: InfoBlock, info_crc: u32, table: &[u8]) -> Result<Self> {
        let mut objects = Vec::with_capacity(info.object_count as usize);
        let mut routes = Vec::new();
        let mut next_id: u16 = 1;
        let mut mem_size = 0;

        for chunk in table.chunks_exact(info::OBJECT_ENTRY_SIZE) {
            let mut entry = ObjectEntry::decode(chunk);

            if entry.report_ids > 0 {
                let count = entry.report_ids as u16 * entry.instances() as u16;
                let last = next_id + count - 1;
                if last > u8::MAX as u16 - 1 {
                    return Err(Error::protocol(format!(
                        "report ids exhausted at T{}",
                        entry.object_type
                    )));
                }
                entry.report_id_range = Some(ReportIdRange {
                    min: next_id as u8,
                    max: last as u8,
                });
                next_id = last + 1;
            }

            log::debug!(
                "directory: T{} start={} size={} instances={} report ids={}",
                entry.object_type,
                entry.start_address,
                entry.size(),
                entry.instances(),
                entry
                    .report_id_range
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".into())
            );

            if let Some(route) = Route::for_object(entry.object_type) {
                let range = if route == Route::Touch {
                    entry.first_instance_range()
                } else {
                    entry.report_id_range
                };
                // Only the first object of a type gets a route
                if let Some(range) = range {
                    if !routes.iter().any(|r: &RouteEntry| r.route == route) {
                        routes.push(RouteEntry { range, route });
                    }
                }
            }

            mem_size = mem_size.max(entry.end());
            objects.push(entry);
        }

        let find = |t: u8| objects.iter().find(|o| o.object_type == t);
        let crc_framed = find(object::SPT_MESSAGECOUNT_T144).is_some();

        if let Some(t44) = find(object::SPT_MESSAGECOUNT_T44) {
            let t5 = find(object::GEN_MESSAGE_T5).map(|o| o.start_address);
            if t5 != Some(t44.start_address.wrapping_add(1)) {
                return Err(Error::protocol("invalid T44 position"));
            }
        }

        let message_size = match find(object::GEN_MESSAGE_T5) {
            Some(t5) if crc_framed || (info.family_id == 0x80 && info.version < 0x20) => t5.size(),
            Some(t5) => t5.size() - 1,
            None => 0,
        };

        if crc_framed {
            log::info!("directory: CRC framing required");
        }

        Ok(Self {
            info,
            info_crc,
            objects,
            max_report_id: (next_id - 1) as u8,
            mem_size,
            message_size,
            crc_framed,
            routes: RouteTable::new(routes)?,
        })
    }

    /// ID header
    pub fn info(&self) -> &InfoBlock {
        &self.info
    }

    /// Checksum of header and table as reported by the device
    pub fn info_crc(&self) -> u32 {
        self.info_crc
    }

    /// Entries in table order
    pub fn objects(&self) -> &[ObjectEntry] {
        &self.objects
    }

    /// Look up an object by type
    pub fn get(&self, object_type: u8) -> Option<&ObjectEntry> {
        self.objects.iter().find(|o| o.object_type == object_type)
    }

    /// Look up an object the caller cannot do without
    pub fn require(&self, object_type: u8) -> Result<&ObjectEntry> {
        self.get(object_type).ok_or(Error::NotFound(object_type))
    }

    /// Address of the first instance of `object_type`
    pub fn address(&self, object_type: u8) -> Option<u16> {
        self.get(object_type).map(|o| o.start_address)
    }

    /// Report ids owned by `object_type`
    pub fn report_range(&self, object_type: u8) -> Option<ReportIdRange> {
        self.get(object_type).and_then(|o| o.report_id_range)
    }

    /// Object owning `report_id`, with the instance it belongs to
    pub fn object_for_report_id(&self, report_id: u8) -> Option<(&ObjectEntry, usize)> {
        self.objects.iter().find_map(|o| {
            let range = o.report_id_range?;
            range
                .contains(report_id)
                .then(|| (o, (report_id - range.min) as usize / o.report_ids as usize))
        })
    }

    /// Highest report id assigned to any object
    pub fn max_report_id(&self) -> u8 {
        self.max_report_id
    }

    /// One past the last byte of the highest object
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    /// First address past the info block, where configuration memory starts
    pub fn config_start(&self) -> usize {
        info::HEADER_SIZE + self.info.table_size()
    }

    /// Size of one message record as read from the message object
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Whether the device requires CRC framing
    pub fn is_crc_framed(&self) -> bool {
        self.crc_framed
    }

    /// Address of the fast-path message count object, if any
    pub fn message_count_address(&self) -> Option<u16> {
        if self.crc_framed {
            self.address(object::SPT_MESSAGECOUNT_T144)
        } else {
            self.address(object::SPT_MESSAGECOUNT_T44)
        }
    }

    /// Report-id routes
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: InfoBlock = InfoBlock {
        family_id: 0x81,
        variant_id: 0x01,
        version: 0x10,
        build: 0xAA,
        matrix_x: 16,
        matrix_y: 14,
        object_count: 0,
    };

    fn sample_objects() -> Vec<ObjectEntry> {
        vec![
            ObjectEntry::new(object::SPT_MESSAGECOUNT_T44, 0x40, 1, 1, 0),
            ObjectEntry::new(object::GEN_MESSAGE_T5, 0x41, 10, 1, 0),
            ObjectEntry::new(object::GEN_COMMAND_T6, 0x4B, 6, 1, 1),
            ObjectEntry::new(object::GEN_POWER_T7, 0x51, 4, 1, 0),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 0x55, 36, 2, 10),
            ObjectEntry::new(object::TOUCH_KEYARRAY_T15, 0x9D, 11, 1, 1),
        ]
    }

    #[test]
    fn test_parse_sample() {
        let raw = encode_info_block(&HEADER, &sample_objects());
        let dir = Directory::parse(&raw).unwrap();

        assert_eq!(dir.info().object_count, 6);
        assert_eq!(dir.objects().len(), 6);
        assert_eq!(dir.report_range(object::GEN_COMMAND_T6), Some(ReportIdRange { min: 1, max: 1 }));
        // Both T9 instances consume ids, only the first is routed
        assert_eq!(dir.report_range(object::TOUCH_MULTI_T9), Some(ReportIdRange { min: 2, max: 21 }));
        assert_eq!(dir.routes().range_of(Route::Touch), Some(ReportIdRange { min: 2, max: 11 }));
        assert_eq!(dir.report_range(object::TOUCH_KEYARRAY_T15), Some(ReportIdRange { min: 22, max: 22 }));
        assert_eq!(dir.max_report_id(), 22);
        assert_eq!(dir.mem_size(), 0x9D + 11);
        assert_eq!(dir.message_size(), 9);
        assert_eq!(dir.config_start(), 7 + 6 * 6 + 3);
        assert!(!dir.is_crc_framed());
        assert_eq!(dir.message_count_address(), Some(0x40));
    }

    #[test]
    fn test_two_entry_table() {
        let objects = vec![
            ObjectEntry::new(object::GEN_MESSAGE_T5, 22, 9, 1, 1),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 31, 20, 1, 2),
        ];
        let dir = Directory::parse(&encode_info_block(&HEADER, &objects)).unwrap();
        assert_eq!(dir.report_range(object::GEN_MESSAGE_T5), Some(ReportIdRange { min: 1, max: 1 }));
        assert_eq!(dir.report_range(object::TOUCH_MULTI_T9), Some(ReportIdRange { min: 2, max: 3 }));
        assert_eq!(dir.routes().range_of(Route::Touch), Some(ReportIdRange { min: 2, max: 3 }));
        assert_eq!(dir.max_report_id(), 3);
        assert_eq!(dir.mem_size(), 31 + 20);
        // Plain framing gives the last byte of T5 to the protocol
        assert_eq!(dir.message_size(), 8);
        assert_eq!(dir.message_count_address(), None);

        // A second touch instance takes ids but gets no route
        let objects = vec![
            ObjectEntry::new(object::GEN_MESSAGE_T5, 22, 9, 1, 1),
            ObjectEntry::new(object::TOUCH_MULTI_T9, 31, 20, 2, 2),
        ];
        let dir = Directory::parse(&encode_info_block(&HEADER, &objects)).unwrap();
        assert_eq!(dir.report_range(object::TOUCH_MULTI_T9), Some(ReportIdRange { min: 2, max: 5 }));
        assert_eq!(dir.routes().range_of(Route::Touch), Some(ReportIdRange { min: 2, max: 3 }));
        assert_eq!(dir.max_report_id(), 5);
        assert_eq!(dir.mem_size(), 31 + 40);
    }

    #[test]
    fn test_flipped_bit_rejected() {
        let raw = encode_info_block(&HEADER, &sample_objects());
        for bit in 0..8 {
            let mut corrupt = raw.clone();
            corrupt[info::HEADER_SIZE + 3] ^= 1 << bit;
            let err = Directory::parse(&corrupt).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Crc);
        }
    }

    #[test]
    fn test_zero_crc_rejected() {
        let raw = vec![0u8; info::HEADER_SIZE + info::CHECKSUM_SIZE];
        assert!(Directory::parse(&raw).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let raw = encode_info_block(&HEADER, &sample_objects());
        let err = Directory::parse(&raw[..raw.len() - 4]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[test]
    fn test_misplaced_t44_rejected() {
        let objects = vec![
            ObjectEntry::new(object::SPT_MESSAGECOUNT_T44, 0x40, 1, 1, 0),
            ObjectEntry::new(object::GEN_MESSAGE_T5, 0x42, 10, 1, 0),
        ];
        let raw = encode_info_block(&HEADER, &objects);
        let err = Directory::parse(&raw).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[test]
    fn test_t144_enables_crc_framing() {
        let objects = vec![
            ObjectEntry::new(object::GEN_MESSAGE_T5, 0x30, 11, 1, 0),
            ObjectEntry::new(object::SPT_MESSAGECOUNT_T144, 0x3B, 2, 1, 0),
        ];
        let header = InfoBlock {
            family_id: 0xA6,
            variant_id: 0x14,
            ..HEADER
        };
        let dir = Directory::parse(&encode_info_block(&header, &objects)).unwrap();
        assert!(dir.is_crc_framed());
        // Full record in CRC mode, the last byte is the CRC8
        assert_eq!(dir.message_size(), 11);
        assert_eq!(dir.message_count_address(), Some(0x3B));
    }

    #[test]
    fn test_ranges_disjoint_and_bounded() {
        let raw = encode_info_block(&HEADER, &sample_objects());
        let dir = Directory::parse(&raw).unwrap();
        let ranges: Vec<_> = dir
            .objects()
            .iter()
            .filter_map(|o| o.report_id_range)
            .collect();
        for (i, a) in ranges.iter().enumerate() {
            assert!(a.min >= 1 && a.max <= dir.max_report_id());
            for b in &ranges[i + 1..] {
                assert!(a.max < b.min || b.max < a.min);
            }
        }
    }

    #[test]
    fn test_route_lookup() {
        let raw = encode_info_block(&HEADER, &sample_objects());
        let dir = Directory::parse(&raw).unwrap();
        assert_eq!(dir.routes().lookup(1).map(|e| e.route), Some(Route::Status));
        assert_eq!(dir.routes().lookup(11).map(|e| e.route), Some(Route::Touch));
        // Second T9 instance is not routed
        assert_eq!(dir.routes().lookup(12), None);
        assert_eq!(dir.routes().lookup(22).map(|e| e.route), Some(Route::KeyArray));
        assert_eq!(dir.routes().lookup(0), None);
        assert_eq!(dir.routes().lookup(0xFF), None);

        let (owner, instance) = dir.object_for_report_id(12).unwrap();
        assert_eq!(owner.object_type, object::TOUCH_MULTI_T9);
        assert_eq!(instance, 1);
    }

    #[test]
    fn test_route_table_rejects_overlap() {
        let entries = vec![
            RouteEntry {
                range: ReportIdRange { min: 1, max: 3 },
                route: Route::Status,
            },
            RouteEntry {
                range: ReportIdRange { min: 3, max: 4 },
                route: Route::Touch,
            },
        ];
        assert!(RouteTable::new(entries).is_err());
    }

    #[test]
    fn test_address_of_instance() {
        let entry = ObjectEntry::new(object::TOUCH_MULTI_T9, 0x100, 36, 2, 10);
        assert_eq!(entry.address_of(0), 0x100);
        assert_eq!(entry.address_of(1), 0x124);
        assert_eq!(entry.encode(), [9, 0x00, 0x01, 35, 1, 10]);
    }

    #[test]
    fn test_firmware_string() {
        assert_eq!(HEADER.firmware(), "1.0.AA");
    }
}
