//! Send command: push a record file to the device.

use anyhow::Result;
use console::style;
use log::{debug, info};
use rdulink::transport::{XOFF, XON};
use rdulink::upload::{upload_lines, upload_xmodem};
use rdulink::{Link, RecordEncoder, RecordFormat, SRecord, Transport};
use std::path::Path;
use std::time::Duration;

use super::{ensure_not_interrupted, progress_bar};
use crate::config::Config;
use crate::image::{LoadedImage, encode_segments};
use crate::{Cli, CliError, OutputFormat, serial, was_interrupted};

/// Transport wrapper that holds writes while the peer has sent XOFF.
struct Paced<'a, T> {
    inner: &'a mut T,
    paused: bool,
}

impl<'a, T: Transport> Paced<'a, T> {
    fn new(inner: &'a mut T) -> Self {
        Self {
            inner,
            paused: false,
        }
    }

    fn absorb(&mut self) {
        while let Some(byte) = self.inner.read_nonblocking() {
            match byte {
                XOFF => self.paused = true,
                XON => self.paused = false,
                _ => {},
            }
        }
    }

    fn wait_for_xon(&mut self) {
        self.absorb();
        if self.paused {
            debug!("send: peer paused, waiting for XON");
        }
        while self.paused && !was_interrupted() {
            std::thread::sleep(Duration::from_millis(1));
            self.absorb();
        }
    }
}

impl<T: Transport> Transport for Paced<'_, T> {
    fn read_nonblocking(&mut self) -> Option<u8> {
        self.inner.read_nonblocking()
    }

    fn has_byte(&self) -> bool {
        self.inner.has_byte()
    }

    fn overrun(&self) -> bool {
        self.inner.overrun()
    }

    fn take_overrun(&mut self) -> bool {
        self.inner.take_overrun()
    }

    fn write(&mut self, byte: u8) {
        self.wait_for_xon();
        self.inner.write(byte);
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.wait_for_xon();
        self.inner.write_all(bytes);
    }
}

/// Record lines for every data segment of `image`.
fn prepare_lines(
    image: &LoadedImage,
    format: &'static dyn RecordFormat,
    chunk: Option<usize>,
) -> Result<Vec<String>> {
    let segments = image.segments_u16()?;
    if segments.is_empty() {
        return Err(CliError::Usage("Input contains no data records".into()).into());
    }
    let mut encoder = RecordEncoder::new(format);
    if let Some(chunk) = chunk {
        encoder = encoder.with_chunk_size(chunk);
    }
    Ok(encode_segments(&encoder, &image.memory, &segments))
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    file: &Path,
    xmodem: bool,
    format: Option<OutputFormat>,
    chunk: Option<usize>,
) -> Result<()> {
    let image = LoadedImage::load(file, config.image_base(), config.image_size())?;
    image.ensure_clean()?;

    let format = format
        .or(config.transfer.format)
        .map(OutputFormat::codec)
        .or(image.format)
        .unwrap_or(&SRecord);
    let lines = prepare_lines(&image, format, chunk.or(config.transfer.chunk_size))?;
    let xmodem = xmodem || config.transfer.xmodem;

    if !cli.quiet {
        eprintln!(
            "{} Sending {} ({} data bytes, {} records) {}",
            style("📦").cyan(),
            style(file.display()).bold(),
            image.data_len(),
            format.name(),
            if xmodem { "over Xmodem" } else { "as lines" }
        );
    }

    let mut io = serial::open_port(cli, config)?;
    ensure_not_interrupted()?;

    if xmodem {
        let total: usize = lines.iter().map(|l| l.len() + 2).sum();
        let packets = total.div_ceil(rdulink::protocol::xmodem::PACKET_SIZE);
        let pb = progress_bar(cli, packets as u64, "packets");

        let mut link = Link::new(io, config.xmodem_config());
        let sent = {
            let mut session = link.begin_transmit()?;
            upload_xmodem(lines, &mut session, |n| pb.set_position(n as u64))
        };
        pb.finish_and_clear();
        let sent = sent?;
        link.transport_mut().flush()?;
        info!("Sent {sent} packet(s)");
    } else {
        let pb = progress_bar(cli, lines.len() as u64, "lines");
        let count = {
            let mut paced = Paced::new(&mut io);
            upload_lines(lines.into_iter().inspect(|_| pb.inc(1)), &mut paced)
        };
        pb.finish_and_clear();
        let count = count?;
        io.flush()?;
        info!("Sent {count} line(s)");
    }

    if !cli.quiet {
        eprintln!("{} Transfer complete", style("✓").green().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdulink::{IntelHex, QueueTransport};

    #[test]
    fn test_paced_writes_wait_for_xon() {
        let mut queue = QueueTransport::with_input(&[XOFF, b'x', XON]);
        {
            let mut paced = Paced::new(&mut queue);
            paced.write_all(b"S9030000FC\r\n");
            assert!(!paced.paused);
        }
        assert_eq!(queue.written(), b"S9030000FC\r\n");
    }

    #[test]
    fn test_prepare_lines_uses_requested_format() {
        let image = LoadedImage::parse("S1070100DEADBEEFBF\nS9030000FC\n", 0, 0x1000);
        let lines = prepare_lines(&image, &IntelHex, None).unwrap();
        assert_eq!(lines, vec![":04010000DEADBEEFC3", ":00000001FF"]);
    }

    #[test]
    fn test_prepare_lines_rejects_empty_image() {
        let image = LoadedImage::parse("S9030000FC\n", 0, 0x1000);
        assert!(prepare_lines(&image, &SRecord, Some(16)).is_err());
    }
}
