//! Packet checksums: 8-bit additive sum and CRC16-XMODEM.

use byteorder::{BigEndian, ByteOrder};

/// CRC16-XMODEM polynomial (x^16 + x^12 + x^5 + 1).
pub const CRC16_POLY: u16 = 0x1021;

/// Calculate CRC16-XMODEM (poly 0x1021, init 0x0000, no reflection).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// 8-bit wrapping sum of all bytes.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Per-session packet check algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Checksum {
    /// One trailing byte: additive sum of the payload.
    Additive,
    /// Two trailing bytes: CRC16-XMODEM of the payload, high byte first.
    Crc16,
}

impl Checksum {
    /// Length of the trailing check field.
    pub const fn field_len(self) -> usize {
        match self {
            Self::Additive => 1,
            Self::Crc16 => 2,
        }
    }

    /// Write the check field for `data` into `out` (which must be `field_len()` long).
    pub fn write(self, data: &[u8], out: &mut [u8]) {
        match self {
            Self::Additive => out[0] = checksum8(data),
            Self::Crc16 => BigEndian::write_u16(out, crc16_xmodem(data)),
        }
    }

    /// Whether `field` is the correct check field for `data`.
    pub fn matches(self, data: &[u8], field: &[u8]) -> bool {
        match self {
            Self::Additive => field.len() == 1 && field[0] == checksum8(data),
            Self::Crc16 => field.len() == 2 && BigEndian::read_u16(field) == crc16_xmodem(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_xmodem_check_value() {
        // Standard check value for CRC-16/XMODEM.
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
        assert_eq!(crc16_xmodem(&[]), 0x0000);
    }

    #[test]
    fn test_checksum8_wraps() {
        assert_eq!(checksum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum8(&[]), 0);
    }

    #[test]
    fn test_checksum_field_roundtrip() {
        let data = [0x55u8; 128];
        let mut field = [0u8; 2];
        Checksum::Crc16.write(&data, &mut field);
        assert!(Checksum::Crc16.matches(&data, &field));
        field[1] ^= 1;
        assert!(!Checksum::Crc16.matches(&data, &field));

        let mut one = [0u8; 1];
        Checksum::Additive.write(&data, &mut one);
        assert_eq!(one[0], 0x80);
        assert!(Checksum::Additive.matches(&data, &one));
        assert_eq!(Checksum::Additive.field_len(), 1);
        assert_eq!(Checksum::Crc16.field_len(), 2);
    }
}
