//! Register transport
//!
//! Two wire formats are supported:
//!
//! - **Plain**: the 16-bit little-endian register address is written,
//!   then the payload is read in a combined transaction, or written
//!   directly after the address.
//! - **CRC-framed**: every host transfer carries a sequence number and a
//!   trailing CRC8: `[addr_lo, addr_hi, seq, payload..., crc8]`. Writes are
//!   split into frames of at most [`MAX_FRAME_PAYLOAD`] bytes, each retried
//!   on its own. Reads send a header-only frame to set the address pointer
//!   (unless the pointer is already known) and may verify the CRC8 the
//!   device appends to message records.

use crate::bus::I2cBus;
use crate::crc::crc8;
use crate::error::{Error, Result};

/// Largest payload carried by one CRC frame
pub const MAX_FRAME_PAYLOAD: usize = 11;

/// Attempts per CRC frame before the whole write is aborted
pub const FRAME_RETRIES: u32 = 10;

/// Wire format in use for register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Address then payload, no integrity protection
    Plain,
    /// Sequence numbered frames with CRC8 trailer
    Crc,
}

/// Per-session sequence and error counters for CRC framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceState {
    /// Sequence number for the next frame
    pub tx_seq: u8,
    /// CRC mismatches seen on message reads since the last resync
    pub crc_errors: u8,
    /// Consecutive status messages reporting a communication error
    pub comm_errors: u8,
}

impl SequenceState {
    /// Take the sequence number for the next frame
    pub fn next(&mut self) -> u8 {
        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        seq
    }

    /// Give back a sequence number whose frame was not delivered
    pub fn rewind(&mut self, used: u8) {
        self.tx_seq = used;
    }

    /// Restart at sequence 0 with cleared counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of the CRC8 check on a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// No check was performed
    Unchecked,
    /// The trailing CRC8 matched
    Verified,
    /// The trailing CRC8 did not match; the data was still returned
    Mismatch {
        /// CRC8 calculated over the received payload
        calculated: u8,
        /// CRC8 byte received from the device
        received: u8,
    },
}

impl Integrity {
    /// Whether the check failed
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }

    /// Turn a mismatch into a CRC error
    pub fn require(self, what: &str) -> Result<()> {
        match self {
            Self::Mismatch {
                calculated,
                received,
            } => Err(Error::Crc(format!(
                "{}: calculated 0x{:02X}, read 0x{:02X}",
                what, calculated, received
            ))),
            _ => Ok(()),
        }
    }
}

/// How a CRC-framed read is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Send a header frame to set the address pointer first
    pub header: bool,
    /// Verify the CRC8 in the last byte of the buffer
    pub verify: bool,
}

impl ReadOptions {
    /// Ordinary register read
    pub const REGISTER: Self = Self {
        header: true,
        verify: false,
    };

    /// Message or message count read with pointer set
    pub const MESSAGE: Self = Self {
        header: true,
        verify: true,
    };

    /// Follow-up message read; the pointer already sits on the message object
    pub const FOLLOW_UP: Self = Self {
        header: false,
        verify: true,
    };
}

/// Build a CRC frame for `reg` carrying `payload`
pub fn encode_frame(reg: u16, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&reg.to_le_bytes());
    frame.push(seq);
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame));
    frame
}

/// Register link to the application firmware of one controller
#[derive(Debug, Clone)]
pub struct Link {
    address: u8,
    framing: Framing,
    seq: SequenceState,
}

impl Link {
    /// Create a plain link to the device at `address`
    pub fn new(address: u8) -> Self {
        Self {
            address,
            framing: Framing::Plain,
            seq: SequenceState::default(),
        }
    }

    /// 7-bit bus address of the application firmware
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Current wire format
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switch the wire format
    pub fn set_framing(&mut self, framing: Framing) {
        if framing != self.framing {
            log::debug!("transport: framing {:?} -> {:?}", self.framing, framing);
        }
        self.framing = framing;
    }

    /// Whether CRC framing is active
    pub fn is_crc(&self) -> bool {
        self.framing == Framing::Crc
    }

    /// Sequence state
    pub fn seq(&self) -> &SequenceState {
        &self.seq
    }

    /// Mutable sequence state
    pub fn seq_mut(&mut self) -> &mut SequenceState {
        &mut self.seq
    }

    /// Read `buf.len()` bytes starting at register `reg`
    ///
    /// In CRC mode with `opts.verify` the last byte of `buf` is the CRC8
    /// of the bytes before it. A mismatch bumps the CRC error counter and
    /// is reported through the returned [`Integrity`], never as an error.
    pub fn read<B: I2cBus>(
        &mut self,
        bus: &mut B,
        reg: u16,
        buf: &mut [u8],
        opts: ReadOptions,
    ) -> Result<Integrity> {
        match self.framing {
            Framing::Plain => {
                bus.write_read(self.address, &reg.to_le_bytes(), buf)?;
                Ok(Integrity::Unchecked)
            }
            Framing::Crc => {
                if opts.header {
                    self.send_frame(bus, reg, &[])?;
                }
                bus.read(self.address, buf)?;

                if !opts.verify || buf.len() < 2 {
                    return Ok(Integrity::Unchecked);
                }

                let (payload, trailer) = buf.split_at(buf.len() - 1);
                let calculated = crc8(payload);
                if calculated == trailer[0] {
                    log::trace!("transport: read CRC passed at 0x{:04X}", reg);
                    Ok(Integrity::Verified)
                } else {
                    self.seq.crc_errors = self.seq.crc_errors.saturating_add(1);
                    log::error!(
                        "transport: read CRC failed at 0x{:04X} (calculated 0x{:02X}, read 0x{:02X})",
                        reg,
                        calculated,
                        trailer[0]
                    );
                    Ok(Integrity::Mismatch {
                        calculated,
                        received: trailer[0],
                    })
                }
            }
        }
    }

    /// Write `data` starting at register `reg`
    ///
    /// An empty `data` only sets the address pointer.
    pub fn write<B: I2cBus>(&mut self, bus: &mut B, reg: u16, data: &[u8]) -> Result<()> {
        match self.framing {
            Framing::Plain => {
                let mut buf = Vec::with_capacity(data.len() + 2);
                buf.extend_from_slice(&reg.to_le_bytes());
                buf.extend_from_slice(data);
                bus.write(self.address, &buf)
            }
            Framing::Crc => {
                if data.is_empty() {
                    return self.send_frame(bus, reg, &[]);
                }
                for (i, chunk) in data.chunks(MAX_FRAME_PAYLOAD).enumerate() {
                    let frame_reg = reg.wrapping_add((i * MAX_FRAME_PAYLOAD) as u16);
                    self.send_frame(bus, frame_reg, chunk)?;
                }
                Ok(())
            }
        }
    }

    /// Send one CRC frame, retrying with the same sequence number on failure
    fn send_frame<B: I2cBus>(&mut self, bus: &mut B, reg: u16, payload: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            let seq = self.seq.next();
            let frame = encode_frame(reg, seq, payload);
            log::trace!(
                "transport: frame reg=0x{:04X} seq={} len={}",
                reg,
                seq,
                frame.len()
            );
            match bus.write(self.address, &frame) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.seq.rewind(seq);
                    attempt += 1;
                    if attempt >= FRAME_RETRIES {
                        log::error!(
                            "transport: frame to 0x{:04X} failed after {} attempts",
                            reg,
                            attempt
                        );
                        return Err(e);
                    }
                    log::debug!("transport: frame to 0x{:04X} failed ({}), retrying", reg, e);
                }
            }
        }
    }
}
