//! Memory-to-record encoding.

use log::trace;

use super::RecordFormat;
use crate::memory::{ByteStore, MemoryTarget};

/// Data bytes per record unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Byte emitted for addresses the target cannot supply.
const UNREADABLE: u8 = 0xFF;

/// Encodes address ranges of a [`MemoryTarget`] as record lines.
#[derive(Clone, Copy)]
pub struct RecordEncoder {
    format: &'static dyn RecordFormat,
    chunk: usize,
}

impl std::fmt::Debug for RecordEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEncoder")
            .field("format", &self.format.name())
            .field("chunk", &self.chunk)
            .finish()
    }
}

impl RecordEncoder {
    /// Encoder with the default chunk size.
    pub fn new(format: &'static dyn RecordFormat) -> Self {
        Self {
            format,
            chunk: DEFAULT_CHUNK_SIZE.min(format.max_data_len()),
        }
    }

    /// Set the data bytes per record, clamped to what the format can carry.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.clamp(1, self.format.max_data_len());
        self
    }

    /// The format lines are written in.
    pub fn format(&self) -> &'static dyn RecordFormat {
        self.format
    }

    /// Data bytes per record.
    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    /// Lines for `start..=end`: data records followed by one terminator whose
    /// entry address is `start`. An empty range yields only the terminator.
    pub fn encode_range<'m, S: ByteStore>(
        &self,
        memory: &'m MemoryTarget<S>,
        start: u16,
        end: u16,
    ) -> EncodeRange<'m, S> {
        EncodeRange {
            memory,
            format: self.format,
            chunk: self.chunk,
            next: u32::from(start),
            end: u32::from(end),
            entry: start,
            terminated: false,
        }
    }
}

/// Iterator over the lines of one encoded range.
pub struct EncodeRange<'m, S: ByteStore> {
    memory: &'m MemoryTarget<S>,
    format: &'static dyn RecordFormat,
    chunk: usize,
    next: u32,
    end: u32,
    entry: u16,
    terminated: bool,
}

impl<S: ByteStore> EncodeRange<'_, S> {
    /// Address of the next data record, or `None` once only the terminator
    /// (or nothing) is left.
    pub fn next_address(&self) -> Option<u16> {
        if self.next > self.end {
            return None;
        }
        u16::try_from(self.next).ok()
    }

    /// Yield data records only, for all but the last of several ranges sent
    /// as one image.
    #[must_use]
    pub fn without_terminator(mut self) -> Self {
        self.terminated = true;
        self
    }

    /// Restart data output at `address`, e.g. after an interrupted upload.
    pub fn resume_from(&mut self, address: u16) {
        trace!("encode: resuming at 0x{address:04X}");
        self.next = u32::from(address);
        self.terminated = false;
    }
}

impl<S: ByteStore> Iterator for EncodeRange<'_, S> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(address) = self.next_address() {
            let remaining = usize::try_from(self.end - self.next + 1).unwrap_or(usize::MAX);
            let len = remaining.min(self.chunk);
            let data: Vec<u8> = (self.next..)
                .take(len)
                .map(|a| self.memory.read(a).unwrap_or(UNREADABLE))
                .collect();
            self.next += u32::try_from(len).unwrap_or(u32::MAX);
            return Some(self.format.encode_data(address, &data));
        }
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(self.format.encode_terminator(self.entry))
    }
}
