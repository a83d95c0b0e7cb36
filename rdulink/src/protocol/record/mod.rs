//! Textual record codec: Motorola S-records and Intel Hex.
//!
//! Both formats carry a record type, a byte count, a target address, data
//! bytes and a trailing checksum, hex-encoded on one line:
//!
//! ```text
//! S-record:   S <type> <count> <address 2|3|4> <data...> <~sum>
//! Intel Hex:  :        <count> <address 2> <type> <data...> <-sum>
//! ```
//!
//! Each format is a [`RecordFormat`] strategy supplying its own field layout
//! and checksum rule; [`format_for`] picks one from the leading marker of a
//! line. Decoding is strict: non-hex characters and length inconsistencies
//! are format errors, a checksum mismatch is a content error, and in either
//! case nothing from the line is used.

mod encode;
mod ihex;
mod line;
mod srec;

pub use encode::{DEFAULT_CHUNK_SIZE, EncodeRange, RecordEncoder};
pub use ihex::IntelHex;
pub use line::{DEFAULT_LINE_CAPACITY, LineAssembler, LineEvent, LineReader};
pub use srec::SRecord;

use thiserror::Error;

/// What a decoded record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordKind {
    /// Data bytes for the memory target.
    Data,
    /// Header or comment text (S0, Intel types other than 00/01).
    Comment,
    /// Record count (S5/S6); carries no data for the target.
    Count,
    /// End of the image (S7/S8/S9, Intel type 01).
    Terminator,
}

/// One decoded record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Kind of record.
    pub kind: RecordKind,
    /// Raw record type (S-record digit value, Intel type byte).
    pub record_type: u8,
    /// Address field as written in the record.
    pub address: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Trailing checksum byte (already verified).
    pub checksum: u8,
}

/// Record decoding failures.
///
/// Everything except [`RecordError::Checksum`] is a format fault; a checksum
/// mismatch is a content fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Nothing but whitespace on the line.
    #[error("empty line")]
    Empty,

    /// The line does not start with `S` or `:`.
    #[error("unknown record marker '{0}'")]
    UnknownMarker(char),

    /// A character that is not a hex digit.
    #[error("non-hex character at column {position}")]
    NonHex {
        /// Zero-based column of the offending character.
        position: usize,
    },

    /// An odd number of hex digits.
    #[error("odd number of hex digits")]
    OddLength,

    /// The declared length puts the checksum beyond the end of the line.
    #[error("record declares {declared} byte(s) but only {available} present")]
    Truncated {
        /// Bytes the count field promises.
        declared: usize,
        /// Bytes actually on the line.
        available: usize,
    },

    /// Extra bytes after the checksum.
    #[error("record declares {declared} byte(s) but {available} present")]
    Trailing {
        /// Bytes the count field promises.
        declared: usize,
        /// Bytes actually on the line.
        available: usize,
    },

    /// The count is too small to hold the address and checksum.
    #[error("record count {declared} too small for its type")]
    BadLength {
        /// Count field value.
        declared: usize,
    },

    /// A record type the format does not define.
    #[error("unsupported record type '{0}'")]
    UnsupportedType(char),

    /// The trailing checksum does not match the record bytes.
    #[error("checksum mismatch: record says {expected:#04x}, computed {computed:#04x}")]
    Checksum {
        /// Checksum byte on the line.
        expected: u8,
        /// Checksum computed from the record bytes.
        computed: u8,
    },
}

impl RecordError {
    /// Whether this is a content (checksum) fault rather than a format fault.
    pub fn is_checksum(&self) -> bool {
        matches!(self, Self::Checksum { .. })
    }
}

/// A textual record format.
pub trait RecordFormat: Send + Sync {
    /// Human-readable format name.
    fn name(&self) -> &'static str;

    /// Leading marker character.
    fn marker(&self) -> u8;

    /// Largest data payload one record can carry.
    fn max_data_len(&self) -> usize;

    /// Checksum over the record bytes that precede the checksum field.
    fn checksum(&self, fields: &[u8]) -> u8;

    /// Decode one upper-case line starting with this format's marker.
    fn decode(&self, line: &[u8]) -> Result<Record, RecordError>;

    /// Encode a data record for a 16-bit address.
    fn encode_data(&self, address: u16, data: &[u8]) -> String;

    /// Encode the terminating record.
    fn encode_terminator(&self, entry: u16) -> String;
}

/// Select the format for a line by its leading marker.
pub fn format_for(marker: u8) -> Option<&'static dyn RecordFormat> {
    match marker {
        b'S' | b's' => Some(&SRecord),
        b':' => Some(&IntelHex),
        _ => None,
    }
}

/// Decode a single line of either format.
pub fn decode_line(line: &str) -> Result<Record, RecordError> {
    let line = line.trim();
    let upper = line.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let Some(&marker) = bytes.first() else {
        return Err(RecordError::Empty);
    };
    let format = format_for(marker).ok_or(RecordError::UnknownMarker(char::from(marker)))?;
    format.decode(bytes)
}

/// Decode hex digit pairs from `text`; `offset` is the column of `text[0]`
/// in the full line, used for error positions.
fn decode_hex(text: &[u8], offset: usize) -> Result<Vec<u8>, RecordError> {
    if let Some(pos) = text.iter().position(|c| !c.is_ascii_hexdigit()) {
        return Err(RecordError::NonHex {
            position: offset + pos,
        });
    }
    if text.len() % 2 != 0 {
        return Err(RecordError::OddLength);
    }
    Ok(text
        .chunks_exact(2)
        .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
        .collect())
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Upper-case hex encoding of `bytes`.
fn encode_hex(out: &mut String, bytes: &[u8]) {
    use std::fmt::Write as _;
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
}

/// Compare the trailing checksum of `bytes` against `format`'s rule.
fn verify_checksum(format: &dyn RecordFormat, bytes: &[u8]) -> Result<u8, RecordError> {
    let (fields, tail) = bytes.split_at(bytes.len() - 1);
    let expected = tail[0];
    let computed = format.checksum(fields);
    if expected == computed {
        Ok(expected)
    } else {
        Err(RecordError::Checksum { expected, computed })
    }
}
