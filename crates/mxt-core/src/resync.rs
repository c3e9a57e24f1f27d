//! Sequence resynchronisation
//!
//! When CRC framing loses lock-step with the controller (repeated CRC
//! failures on message reads, or the controller reporting communication
//! errors), the host restarts its sequence counter at zero and re-reads the
//! info block until the controller answers consistently again. There is no
//! back-off: the budget is a number of attempts, not wall time.

use crate::bus::I2cBus;
use crate::directory::{Directory, InfoBlock};
use crate::error::{Error, Result};
use crate::protocol::info;
use crate::transport::{Framing, Link, ReadOptions, SequenceState};

/// Attempts before resync gives up
pub const RESYNC_ATTEMPTS: u32 = 260;

/// Whether framing is believed to be in lock-step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Sequence numbers agree
    InSync,
    /// A resync is in progress
    Resyncing,
}

/// When and how hard to resync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncPolicy {
    /// Resync automatically; when disabled thresholds are only logged
    pub enabled: bool,
    /// Attempt budget
    pub max_attempts: u32,
    /// Resync once more CRC errors than this have accumulated
    pub crc_error_threshold: u8,
    /// Resync once this many consecutive COMSERR statuses were seen
    pub comm_error_threshold: u8,
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: RESYNC_ATTEMPTS,
            crc_error_threshold: 3,
            comm_error_threshold: 5,
        }
    }
}

impl ResyncPolicy {
    /// Whether the CRC error count calls for a resync
    pub fn crc_errors_exceeded(&self, seq: &SequenceState) -> bool {
        seq.crc_errors > self.crc_error_threshold
    }

    /// Whether the COMSERR count calls for a resync
    pub fn comm_errors_exceeded(&self, seq: &SequenceState) -> bool {
        seq.comm_errors >= self.comm_error_threshold
    }
}

/// Result of a successful resync
#[derive(Debug)]
pub struct ResyncOutcome {
    /// Freshly parsed directory, when the full table was re-read
    pub directory: Option<Directory>,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Read and validate the complete info block through `link`
pub fn read_info_block<B: I2cBus>(bus: &mut B, link: &mut Link) -> Result<Directory> {
    let mut header = [0u8; info::HEADER_SIZE];
    link.read(bus, 0, &mut header, ReadOptions::REGISTER)?;
    let info = InfoBlock::parse(&header)?;
    read_table(bus, link, &header, &info)
}

fn read_table<B: I2cBus>(
    bus: &mut B,
    link: &mut Link,
    header: &[u8],
    info: &InfoBlock,
) -> Result<Directory> {
    let mut raw = vec![0u8; info::HEADER_SIZE + info.table_size()];
    raw[..info::HEADER_SIZE].copy_from_slice(header);
    link.read(
        bus,
        info::OBJECT_START,
        &mut raw[info::HEADER_SIZE..],
        ReadOptions::REGISTER,
    )?;
    Directory::parse(&raw)
}

/// Run one attempt: header, and the table where the family requires it
fn attempt<B: I2cBus>(
    bus: &mut B,
    link: &mut Link,
    current: &Directory,
) -> Result<Option<Directory>> {
    let mut header = [0u8; info::HEADER_SIZE];
    link.read(bus, 0, &mut header, ReadOptions::REGISTER)?;
    let info = InfoBlock::parse(&header)?;

    if info.family_id == info::FAMILY_CHECKSUM_TABLE {
        return read_table(bus, link, &header, &info).map(Some);
    }

    let known = current.info();
    if info.family_id != known.family_id || info.object_count != known.object_count {
        return Err(Error::protocol(format!(
            "header changed: family 0x{:02X} objects {}",
            info.family_id, info.object_count
        )));
    }
    Ok(None)
}

/// Re-establish CRC framing with the controller
///
/// Every attempt starts from sequence number 0 with cleared error counters.
/// On success the link is back in lock-step; on exhaustion a
/// [`Error::Protocol`] is returned and the device must be re-initialised.
pub fn resync<B: I2cBus>(
    bus: &mut B,
    link: &mut Link,
    current: &Directory,
    policy: &ResyncPolicy,
) -> Result<ResyncOutcome> {
    link.set_framing(Framing::Crc);
    log::info!("resync: starting, budget {} attempts", policy.max_attempts);

    for n in 1..=policy.max_attempts {
        link.seq_mut().reset();
        match attempt(bus, link, current) {
            Ok(directory) => {
                log::info!("resync: in sync after {} attempt(s)", n);
                return Ok(ResyncOutcome {
                    directory,
                    attempts: n,
                });
            }
            Err(e) => log::debug!("resync: attempt {} failed: {}", n, e),
        }
    }

    link.seq_mut().reset();
    log::error!("resync: failed after {} attempts", policy.max_attempts);
    Err(Error::protocol(format!(
        "resync failed after {} attempts",
        policy.max_attempts
    )))
}
