//! Record files loaded into a host-side memory image.

use anyhow::{Context, Result};
use log::{debug, warn};
use rdulink::{
    DownloadConfig, DownloadSummary, Downloader, LineStatus, MemoryTarget, RecordEncoder,
    RecordFormat, format_for,
};
use std::fs;
use std::path::Path;

use crate::CliError;

/// A record file applied to a RAM target.
pub(crate) struct LoadedImage {
    /// The image; byte 0 holds record address `base`.
    pub memory: MemoryTarget,
    /// Contiguous runs of image addresses covered by data records.
    pub segments: Vec<(u32, u32)>,
    /// Comment-type record text, in file order.
    pub comments: Vec<String>,
    /// Format of the first record line, if any.
    pub format: Option<&'static dyn RecordFormat>,
    /// Intel Hex address-extension records with a non-zero value. Their data
    /// would sit above 64K but lands at its 16-bit address here.
    pub address_extensions: usize,
    /// Download counters.
    pub summary: DownloadSummary,
}

impl LoadedImage {
    /// Parse `text` into an image of `size` bytes whose first byte is record
    /// address `base`.
    pub fn parse(text: &str, base: u32, size: u32) -> Self {
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        let mut memory = MemoryTarget::ram(0, len);
        let config = DownloadConfig {
            base_address: base,
            ..DownloadConfig::default()
        };
        let mut downloader = Downloader::new(&mut memory, config);
        let mut spans = Vec::new();
        let mut comments = Vec::new();
        let mut format = None;
        let mut address_extensions = 0;

        for (number, line) in (1..).zip(text.lines()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if format.is_none() {
                format = line.bytes().next().and_then(format_for);
            }
            let extension = address_extension(line);
            match extension {
                Some(0) => debug!("line {number}: zero address extension"),
                Some(value) => {
                    warn!(
                        "line {number}: address extension 0x{value:04X} is not supported; \
                         following data keeps its 16-bit address"
                    );
                    address_extensions += 1;
                },
                None => {},
            }
            match downloader.decode_line(line) {
                LineStatus::Applied { address, len } => {
                    let len = u32::try_from(len).unwrap_or(u32::MAX);
                    if len > 0 {
                        spans.push((address, address.saturating_add(len - 1)));
                    }
                },
                LineStatus::Comment(text) if extension.is_none() => comments.push(text),
                LineStatus::FormatError(err) => warn!("line {number}: {err}"),
                LineStatus::ChecksumError { expected, computed } => warn!(
                    "line {number}: checksum 0x{expected:02X}, computed 0x{computed:02X}"
                ),
                LineStatus::Terminated if downloader.is_terminated() => {
                    debug!("line {number}: terminator");
                },
                _ => {},
            }
        }

        let summary = downloader.summary();
        drop(downloader);
        Self {
            memory,
            segments: merge_spans(spans),
            comments,
            format,
            address_extensions,
            summary,
        }
    }

    /// Read and parse a record file.
    pub fn load(path: &Path, base: u32, size: u32) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&text, base, size))
    }

    /// Fail unless every line decoded and every byte landed in the image.
    pub fn ensure_clean(&self) -> Result<()> {
        let s = &self.summary;
        if s.format_errors > 0 || s.checksum_errors > 0 {
            anyhow::bail!(
                "record file has {} format error(s) and {} checksum error(s)",
                s.format_errors,
                s.checksum_errors
            );
        }
        if self.address_extensions > 0 {
            anyhow::bail!(
                "record file has {} address extension record(s); only 16-bit addresses are supported",
                self.address_extensions
            );
        }
        if let Some(address) = s.faults.first_fault {
            anyhow::bail!(
                "record data falls outside the image (first at 0x{address:X}, flags {:?})",
                s.faults.flags
            );
        }
        Ok(())
    }

    /// Segments as 16-bit ranges, as the record encoders address them.
    pub fn segments_u16(&self) -> Result<Vec<(u16, u16)>> {
        self.segments
            .iter()
            .map(|&(start, end)| match (u16::try_from(start), u16::try_from(end)) {
                (Ok(start), Ok(end)) => Ok((start, end)),
                _ => Err(CliError::Usage(format!(
                    "Image address 0x{end:X} is above 0xFFFF; records only carry 16-bit addresses"
                ))
                .into()),
            })
            .collect()
    }

    /// Total bytes covered by the segments.
    pub fn data_len(&self) -> u64 {
        self.segments
            .iter()
            .map(|&(start, end)| u64::from(end - start) + 1)
            .sum()
    }
}

/// Encode several ranges as one record stream sharing the last terminator.
pub(crate) fn encode_segments(
    encoder: &RecordEncoder,
    memory: &MemoryTarget,
    segments: &[(u16, u16)],
) -> Vec<String> {
    let count = segments.len();
    segments
        .iter()
        .enumerate()
        .flat_map(|(i, &(start, end))| {
            let range = encoder.encode_range(memory, start, end);
            if i + 1 < count {
                range.without_terminator()
            } else {
                range
            }
        })
        .collect()
}

/// Value of an Intel Hex extended segment (02) or linear (04) address record.
fn address_extension(line: &str) -> Option<u16> {
    if !line.starts_with(':') {
        return None;
    }
    let record = rdulink::protocol::record::decode_line(line).ok()?;
    match (record.record_type, record.data.as_slice()) {
        (0x02 | 0x04, &[hi, lo]) => Some(u16::from_be_bytes([hi, lo])),
        _ => None,
    }
}

/// Sort inclusive spans and join those that touch or overlap.
fn merge_spans(mut spans: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    spans.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdulink::{IntelHex, SRecord};

    const TWO_SEGMENTS: &str = "S00600006D6174B7\n\
                                S1070100DEADBEEFBF\n\
                                \n\
                                S10500200102D7\n\
                                S104002103D7\n\
                                S9030000FC\n";

    #[test]
    fn test_merge_spans() {
        assert_eq!(
            merge_spans(vec![(10, 12), (0, 3), (4, 5), (11, 20)]),
            vec![(0, 5), (10, 20)]
        );
        assert!(merge_spans(Vec::new()).is_empty());
    }

    #[test]
    fn test_parse_collects_segments_and_comments() {
        let image = LoadedImage::parse(TWO_SEGMENTS, 0, 0x1000);
        assert_eq!(image.segments, vec![(0x20, 0x22), (0x100, 0x103)]);
        assert_eq!(image.comments, vec!["mat".to_string()]);
        assert_eq!(image.format.map(|f| f.name()), Some("S-record"));
        assert_eq!(image.data_len(), 7);
        assert!(image.summary.terminated);
        assert!(image.ensure_clean().is_ok());
        assert_eq!(image.memory.read(0x101), Some(0xAD));
    }

    #[test]
    fn test_parse_applies_base() {
        let image = LoadedImage::parse("S1070100DEADBEEFBF\n", 0x100, 0x10);
        assert_eq!(image.segments, vec![(0, 3)]);
        assert_eq!(image.memory.read(0), Some(0xDE));
    }

    #[test]
    fn test_checksum_error_is_not_clean() {
        let image = LoadedImage::parse("S1070100DEADBEEFB0\nS9030000FC\n", 0, 0x1000);
        assert_eq!(image.summary.checksum_errors, 1);
        assert!(image.segments.is_empty());
        assert!(image.ensure_clean().is_err());
    }

    #[test]
    fn test_data_outside_image_is_not_clean() {
        let image = LoadedImage::parse("S1070100DEADBEEFBF\n", 0, 0x80);
        assert!(image.ensure_clean().is_err());
    }

    #[test]
    fn test_encode_segments_shares_terminator() {
        let image = LoadedImage::parse(TWO_SEGMENTS, 0, 0x1000);
        let segments = image.segments_u16().unwrap();
        let encoder = RecordEncoder::new(&SRecord);
        let lines = encode_segments(&encoder, &image.memory, &segments);
        assert_eq!(
            lines,
            vec!["S1060020010203D3", "S1070100DEADBEEFBF", "S9030100FB"]
        );
    }

    #[test]
    fn test_intel_hex_input() {
        let image = LoadedImage::parse(":080100000102030405060708D3\n:00000001FF\n", 0, 0x1000);
        assert_eq!(image.format.map(|f| f.name()), Some(IntelHex.name()));
        assert_eq!(image.segments, vec![(0x100, 0x107)]);
    }

    #[test]
    fn test_address_extension_is_rejected() {
        let image = LoadedImage::parse(
            ":020000040001F9\n:04010000DEADBEEFC3\n:00000001FF\n",
            0,
            0x1000,
        );
        assert_eq!(image.address_extensions, 1);
        assert!(image.comments.is_empty());
        let err = image.ensure_clean().unwrap_err();
        assert!(err.to_string().contains("address extension"));
    }

    #[test]
    fn test_zero_address_extension_is_harmless() {
        let image = LoadedImage::parse(
            ":020000040000FA\n:04010000DEADBEEFC3\n:00000001FF\n",
            0,
            0x1000,
        );
        assert_eq!(image.address_extensions, 0);
        assert!(image.comments.is_empty());
        assert!(image.ensure_clean().is_ok());
        assert_eq!(image.segments, vec![(0x100, 0x103)]);
    }
}
