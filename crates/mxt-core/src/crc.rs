//! Checksums used by the object protocol
//!
//! Three independent checksum domains exist:
//!
//! - CRC8 framing (polynomial 0x8C, LSB first) protects every transaction
//!   when CRC-framed transport is active.
//! - CRC8 diagnostic (polynomial 0x1D, MSB first, table driven) protects
//!   assembled T33 diagnostic records.
//! - CRC24 (polynomial 0x80001B over little-endian 16-bit words) protects
//!   the info block and the device configuration.

/// Framing CRC8 polynomial (reflected form)
pub const CRC8_FRAMING_POLY: u8 = 0x8C;

/// Diagnostic CRC8 polynomial
pub const CRC8_DIAG_POLY: u8 = 0x1D;

/// CRC24 polynomial
pub const CRC24_POLY: u32 = 0x80001B;

/// Feed one byte into the framing CRC8 accumulator
pub fn crc8_update(mut crc: u8, mut data: u8) -> u8 {
    for _ in 0..8 {
        let feedback = (crc ^ data) & 0x01;
        data >>= 1;
        crc >>= 1;
        if feedback != 0 {
            crc ^= CRC8_FRAMING_POLY;
        }
    }
    crc
}

/// Framing CRC8 over a byte slice, starting from 0
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| crc8_update(crc, b))
}

/// Table driven CRC8 used for diagnostic message integrity
#[derive(Clone)]
pub struct DiagCrc8 {
    table: [u8; 256],
}

impl DiagCrc8 {
    /// Build the lookup table
    pub fn new() -> Self {
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u8;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 {
                    (crc << 1) ^ CRC8_DIAG_POLY
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
        Self { table }
    }

    /// Compute the checksum of `data` with an initial value of 0
    pub fn checksum(&self, data: &[u8]) -> u8 {
        data.iter()
            .fold(0u8, |crc, &b| self.table[(crc ^ b) as usize])
    }
}

impl Default for DiagCrc8 {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DiagCrc8 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiagCrc8").finish_non_exhaustive()
    }
}

fn crc24_word(crc: u32, first: u8, second: u8) -> u32 {
    let word = ((second as u32) << 8) | first as u32;
    let mut result = (crc << 1) ^ word;
    if result & 0x0100_0000 != 0 {
        result ^= CRC24_POLY;
    }
    result
}

/// CRC24 over a byte slice
///
/// Bytes are consumed in pairs as little-endian words; an odd trailing
/// byte is paired with zero.
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    let mut pairs = data.chunks_exact(2);
    for pair in &mut pairs {
        crc = crc24_word(crc, pair[0], pair[1]);
    }
    if let [last] = pairs.remainder() {
        crc = crc24_word(crc, *last, 0);
    }
    crc & 0x00FF_FFFF
}

/// Decode a 24-bit little-endian value
pub fn le24(bytes: &[u8]) -> u32 {
    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_check_value() {
        // Same algorithm as CRC-8/MAXIM-DOW
        assert_eq!(crc8(b"123456789"), 0xA1);
        assert_eq!(crc8(&[]), 0x00);
    }

    #[test]
    fn test_crc8_incremental() {
        let frame = [0x34, 0x12, 0x07, 0xAA, 0x55];
        let mut crc = 0;
        for &b in &frame {
            crc = crc8_update(crc, b);
        }
        assert_eq!(crc, crc8(&frame));
    }

    #[test]
    fn test_diag_crc8_check_value() {
        // Same algorithm as CRC-8/GSM-A
        let table = DiagCrc8::new();
        assert_eq!(table.checksum(b"123456789"), 0x37);
        assert_eq!(table.checksum(&[]), 0x00);
    }

    #[test]
    fn test_crc24_odd_padding() {
        // An odd region is the same as the region padded with one zero byte
        let odd = [0x11, 0x22, 0x33];
        let padded = [0x11, 0x22, 0x33, 0x00];
        assert_eq!(crc24(&odd), crc24(&padded));
    }

    #[test]
    fn test_crc24_small_values() {
        assert_eq!(crc24(&[]), 0);
        assert_eq!(crc24(&[0x01, 0x00]), 0x000001);
        // (1 << 1) ^ 0x0302
        assert_eq!(crc24(&[0x01, 0x00, 0x02, 0x03]), 0x000300);
    }

    #[test]
    fn test_crc24_polynomial_feedback() {
        // A word that reaches bit 24 after shifting is reduced by the polynomial
        let mut crc = 0x80_0000u32;
        crc = crc24_word(crc, 0, 0);
        assert_eq!(crc & 0x00FF_FFFF, 0x80001B);
    }

    #[test]
    fn test_le24() {
        assert_eq!(le24(&[0x56, 0x34, 0x12]), 0x123456);
    }
}
