//! Motorola S-record format.

use super::{Record, RecordError, RecordFormat, RecordKind, decode_hex, encode_hex, verify_checksum};
use crate::protocol::crc::checksum8;

/// Motorola S-records (`S0`–`S9`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SRecord;

impl SRecord {
    /// Address width in bytes and record kind for a type digit.
    fn layout(digit: u8) -> Option<(usize, RecordKind)> {
        match digit {
            b'0' => Some((2, RecordKind::Comment)),
            b'1' => Some((2, RecordKind::Data)),
            b'2' => Some((3, RecordKind::Data)),
            b'3' => Some((4, RecordKind::Data)),
            b'5' => Some((2, RecordKind::Count)),
            b'6' => Some((3, RecordKind::Count)),
            b'7' => Some((4, RecordKind::Terminator)),
            b'8' => Some((3, RecordKind::Terminator)),
            b'9' => Some((2, RecordKind::Terminator)),
            _ => None,
        }
    }

    fn encode(digit: char, address: u16, data: &[u8]) -> String {
        let count = u8::try_from(data.len() + 3).unwrap_or(u8::MAX);
        let [hi, lo] = address.to_be_bytes();
        let mut fields = Vec::with_capacity(data.len() + 3);
        fields.extend_from_slice(&[count, hi, lo]);
        fields.extend_from_slice(data);

        let mut line = String::with_capacity(4 + fields.len() * 2 + 2);
        line.push('S');
        line.push(digit);
        encode_hex(&mut line, &fields);
        encode_hex(&mut line, &[SRecord.checksum(&fields)]);
        line
    }
}

impl RecordFormat for SRecord {
    fn name(&self) -> &'static str {
        "S-record"
    }

    fn marker(&self) -> u8 {
        b'S'
    }

    fn max_data_len(&self) -> usize {
        // Count byte covers 2 address bytes and the checksum.
        usize::from(u8::MAX) - 3
    }

    fn checksum(&self, fields: &[u8]) -> u8 {
        !checksum8(fields)
    }

    fn decode(&self, line: &[u8]) -> Result<Record, RecordError> {
        if line.len() < 2 {
            return Err(RecordError::Truncated {
                declared: 1,
                available: 0,
            });
        }
        let digit = line[1];
        if !digit.is_ascii_hexdigit() {
            return Err(RecordError::NonHex { position: 1 });
        }
        let bytes = decode_hex(&line[2..], 2)?;

        let (addr_len, kind) =
            Self::layout(digit).ok_or(RecordError::UnsupportedType(char::from(digit)))?;

        let Some((&count, rest)) = bytes.split_first() else {
            return Err(RecordError::Truncated {
                declared: 1,
                available: 0,
            });
        };
        let declared = usize::from(count);
        if declared > rest.len() {
            return Err(RecordError::Truncated {
                declared,
                available: rest.len(),
            });
        }
        if declared < rest.len() {
            return Err(RecordError::Trailing {
                declared,
                available: rest.len(),
            });
        }
        if declared < addr_len + 1 {
            return Err(RecordError::BadLength { declared });
        }

        let checksum = verify_checksum(self, &bytes)?;
        let address = rest[..addr_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        let data = rest[addr_len..rest.len() - 1].to_vec();

        Ok(Record {
            kind,
            record_type: digit - b'0',
            address,
            data,
            checksum,
        })
    }

    fn encode_data(&self, address: u16, data: &[u8]) -> String {
        Self::encode('1', address, data)
    }

    fn encode_terminator(&self, entry: u16) -> String {
        Self::encode('9', entry, &[])
    }
}
