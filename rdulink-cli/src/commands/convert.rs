//! Record format conversion.

use anyhow::{Context, Result};
use log::info;
use rdulink::RecordEncoder;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use crate::config::Config;
use crate::image::{LoadedImage, encode_segments};
use crate::{CliError, OutputFormat};

/// Ranges to emit: the explicit `start..=end` window, or every data segment.
fn select_ranges(
    segments: &[(u16, u16)],
    window: (Option<u16>, Option<u16>),
) -> Result<Vec<(u16, u16)>> {
    let (first, last) = match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => (first.0, last.1),
        _ => (0, 0),
    };
    match window {
        (None, None) => Ok(segments.to_vec()),
        (start, end) => {
            let start = start.unwrap_or(first);
            let end = end.unwrap_or(last);
            if start > end {
                return Err(CliError::Usage(format!(
                    "Start address 0x{start:04X} is above end address 0x{end:04X}"
                ))
                .into());
            }
            Ok(vec![(start, end)])
        },
    }
}

/// Render `image` as record text in the requested format.
pub(crate) fn convert_image(
    image: &LoadedImage,
    to: OutputFormat,
    window: (Option<u16>, Option<u16>),
    chunk: usize,
) -> Result<String> {
    let ranges = select_ranges(&image.segments_u16()?, window)?;
    if ranges.is_empty() {
        return Err(CliError::Usage("Input contains no data records".into()).into());
    }
    let encoder = RecordEncoder::new(to.codec()).with_chunk_size(chunk);
    let mut text = String::new();
    for line in encode_segments(&encoder, &image.memory, &ranges) {
        text.push_str(&line);
        text.push('\n');
    }
    Ok(text)
}

/// Convert command implementation.
pub(crate) fn cmd_convert(
    config: &Config,
    input: &Path,
    to: OutputFormat,
    window: (Option<u16>, Option<u16>),
    chunk: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let image = LoadedImage::load(input, config.image_base(), config.image_size())?;
    image.ensure_clean()?;

    let chunk = chunk
        .or(config.transfer.chunk_size)
        .unwrap_or(rdulink::protocol::record::DEFAULT_CHUNK_SIZE);
    let text = convert_image(&image, to, window, chunk)?;

    if let Some(path) = output {
        fs::write(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(
            "Wrote {} ({} data bytes) to {}",
            to.codec().name(),
            image.data_len(),
            path.display()
        );
    } else {
        io::stdout().write_all(text.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(text: &str) -> LoadedImage {
        LoadedImage::parse(text, 0, 0x1_0000)
    }

    #[test]
    fn test_srecord_to_intel_hex() {
        let text = convert_image(
            &image("S1070100DEADBEEFBF\nS9030000FC\n"),
            OutputFormat::Ihex,
            (None, None),
            32,
        )
        .unwrap();
        assert_eq!(text, ":04010000DEADBEEFC3\n:00000001FF\n");
    }

    #[test]
    fn test_intel_hex_to_srecord_keeps_gaps() {
        let text = convert_image(
            &image(":03002000010203D7\n:04010000DEADBEEFC3\n:00000001FF\n"),
            OutputFormat::Srec,
            (None, None),
            32,
        )
        .unwrap();
        assert_eq!(
            text,
            "S1060020010203D3\nS1070100DEADBEEFBF\nS9030100FB\n"
        );
    }

    #[test]
    fn test_window_fills_gaps_with_erased_bytes() {
        let text = convert_image(
            &image("S1070100DEADBEEFBF\n"),
            OutputFormat::Srec,
            (Some(0x0100), Some(0x0105)),
            32,
        )
        .unwrap();
        let first = text.lines().next().unwrap();
        let record = rdulink::protocol::record::decode_line(first).unwrap();
        assert_eq!(record.data, vec![0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_inverted_window_is_usage_error() {
        let err = select_ranges(&[(0, 0x10)], (Some(0x10), Some(0x08))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_empty_input_is_usage_error() {
        assert!(convert_image(&image("S9030000FC\n"), OutputFormat::Ihex, (None, None), 16).is_err());
    }
}
