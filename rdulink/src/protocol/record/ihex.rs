//! Intel Hex format.

use super::{Record, RecordError, RecordFormat, RecordKind, decode_hex, encode_hex, verify_checksum};
use crate::protocol::crc::checksum8;

/// Data record type.
const TYPE_DATA: u8 = 0x00;

/// End-of-file record type.
const TYPE_EOF: u8 = 0x01;

/// Fixed bytes around the data: count, address (2), type, checksum.
const OVERHEAD: usize = 5;

/// Intel Hex records (`:` marker).
///
/// Types `00` and `01` are data and end-of-file; every other type is treated
/// as a comment-type record.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntelHex;

impl IntelHex {
    fn encode(record_type: u8, address: u16, data: &[u8]) -> String {
        let count = u8::try_from(data.len()).unwrap_or(u8::MAX);
        let [hi, lo] = address.to_be_bytes();
        let mut fields = Vec::with_capacity(data.len() + 4);
        fields.extend_from_slice(&[count, hi, lo, record_type]);
        fields.extend_from_slice(data);

        let mut line = String::with_capacity(1 + (fields.len() + 1) * 2);
        line.push(':');
        encode_hex(&mut line, &fields);
        encode_hex(&mut line, &[IntelHex.checksum(&fields)]);
        line
    }
}

impl RecordFormat for IntelHex {
    fn name(&self) -> &'static str {
        "Intel Hex"
    }

    fn marker(&self) -> u8 {
        b':'
    }

    fn max_data_len(&self) -> usize {
        usize::from(u8::MAX)
    }

    fn checksum(&self, fields: &[u8]) -> u8 {
        checksum8(fields).wrapping_neg()
    }

    fn decode(&self, line: &[u8]) -> Result<Record, RecordError> {
        let bytes = decode_hex(line.get(1..).unwrap_or_default(), 1)?;
        if bytes.len() < OVERHEAD {
            return Err(RecordError::Truncated {
                declared: OVERHEAD,
                available: bytes.len(),
            });
        }

        let declared = OVERHEAD + usize::from(bytes[0]);
        if declared > bytes.len() {
            return Err(RecordError::Truncated {
                declared,
                available: bytes.len(),
            });
        }
        if declared < bytes.len() {
            return Err(RecordError::Trailing {
                declared,
                available: bytes.len(),
            });
        }

        let checksum = verify_checksum(self, &bytes)?;
        let record_type = bytes[3];
        let kind = match record_type {
            TYPE_DATA => RecordKind::Data,
            TYPE_EOF => RecordKind::Terminator,
            _ => RecordKind::Comment,
        };

        Ok(Record {
            kind,
            record_type,
            address: u32::from(u16::from_be_bytes([bytes[1], bytes[2]])),
            data: bytes[4..bytes.len() - 1].to_vec(),
            checksum,
        })
    }

    fn encode_data(&self, address: u16, data: &[u8]) -> String {
        Self::encode(TYPE_DATA, address, data)
    }

    fn encode_terminator(&self, _entry: u16) -> String {
        Self::encode(TYPE_EOF, 0, &[])
    }
}
