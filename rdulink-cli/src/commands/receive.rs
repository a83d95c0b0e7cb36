//! Receive command: capture an image from the device.

use anyhow::{Context, Result};
use console::style;
use log::{debug, info, warn};
use rdulink::command::CommandExecutor;
use rdulink::{
    AccessMode, ByteStore, DownloadConfig, DownloadSummary, Downloader, LineReader, LineStatus,
    Link, MemoryTarget, RxEvent, Ticker, Transport,
};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{ensure_not_interrupted, progress_bar};
use crate::config::Config;
use crate::{Cli, CliError, serial, was_interrupted};

/// Options of the `receive` subcommand.
pub(crate) struct ReceiveOptions {
    pub output: Option<PathBuf>,
    pub verify: Option<PathBuf>,
    pub base: Option<u32>,
    pub offset: u16,
    pub size: Option<u32>,
    pub embedded_commands: bool,
    pub lines: bool,
}

/// Host-side handler for commands embedded in comment records.
///
/// `OFFSET <hex>` moves the relocation offset for the rest of the download;
/// anything else is logged.
#[derive(Debug, Default)]
pub(crate) struct HostCommands {
    seen: Vec<String>,
}

impl CommandExecutor for HostCommands {
    fn execute(&mut self, line: &str, output: &mut String, offset: &mut u16) {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some(cmd), Some(value)) if cmd.eq_ignore_ascii_case("OFFSET") => {
                let value = value.trim_start_matches("0x").trim_start_matches("0X");
                match u16::from_str_radix(value, 16) {
                    Ok(new) => {
                        *offset = new;
                        output.push_str(&format!("OFFSET={new:04X}\n"));
                    },
                    Err(_) => output.push_str(&format!("bad offset '{value}'\n")),
                }
            },
            _ => info!("Device command: {line}"),
        }
        self.seen.push(line.to_string());
    }
}

fn report(status: &LineStatus) {
    match status {
        LineStatus::Comment(text) => info!("Comment: {text}"),
        LineStatus::Command { output, suppressed, .. } => {
            for line in output.lines() {
                info!("{line}");
            }
            if *suppressed > 0 {
                warn!("{suppressed} over-long command(s) dropped");
            }
        },
        _ => {},
    }
}

/// Run the Xmodem receiver until the sender finishes.
fn receive_xmodem<T: Transport, S: ByteStore, E: CommandExecutor>(
    cli: &Cli,
    link: &mut Link<T>,
    downloader: &mut Downloader<'_, S, E>,
    mode: AccessMode,
    offset: u16,
) -> Result<()> {
    let pb = progress_bar(cli, 0, "packets");
    let mut session = link.begin_receive(mode, offset)?;
    let mut ticker = Ticker::new();
    let mut packets = 0u64;

    loop {
        if was_interrupted() && !session.is_finished() {
            session.cancel();
        }
        session.tick(ticker.elapsed_ticks());
        match session.poll() {
            RxEvent::DataReady(data) => {
                let data = *data;
                for status in downloader.feed_packet(&data) {
                    report(&status);
                }
                session.acknowledge();
                packets += 1;
                pb.set_position(packets);
            },
            RxEvent::PacketAcked => debug!("Duplicate packet re-acknowledged"),
            RxEvent::Error => warn!("Lost packet sequence, aborting"),
            RxEvent::Done => break,
            RxEvent::Aborted => {
                pb.finish_and_clear();
                if was_interrupted() {
                    return Err(CliError::Cancelled("Interrupted by user".into()).into());
                }
                anyhow::bail!("Transfer aborted after {packets} packet(s)");
            },
            RxEvent::Idle => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    pb.finish_and_clear();
    if session.overrun() {
        warn!("Receive overrun during transfer");
    }
    if let Some(status) = downloader.flush() {
        report(&status);
    }
    info!("Received {packets} packet(s)");
    Ok(())
}

fn print_summary(summary: &DownloadSummary, mode: AccessMode) {
    eprintln!(
        "  Records: {}  Bytes: {}  Comments: {}  Commands: {}",
        summary.records, summary.bytes, summary.comments, summary.commands
    );
    if summary.overrun {
        eprintln!("  {} receive overrun, lines may be missing", style("⚠").yellow());
    }
    if summary.format_errors > 0 || summary.checksum_errors > 0 {
        eprintln!(
            "  {} {} format error(s), {} checksum error(s)",
            style("⚠").yellow(),
            summary.format_errors,
            summary.checksum_errors
        );
    }
    if let Some(address) = summary.faults.first_fault {
        let what = match mode {
            AccessMode::Store => "write",
            AccessMode::Verify => "verify",
        };
        eprintln!(
            "  {} {what} fault, first at 0x{address:04X} ({:?})",
            style("✗").red(),
            summary.faults.flags
        );
    }
}

/// Receive command implementation.
pub(crate) fn cmd_receive(cli: &Cli, config: &Config, opts: &ReceiveOptions) -> Result<()> {
    let base = opts.base.unwrap_or_else(|| config.image_base());
    let mut size = opts.size.unwrap_or_else(|| config.image_size());

    let reference = match &opts.verify {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            if opts.size.is_none() {
                size = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
            }
            Some(bytes)
        },
        None => None,
    };
    let mode = if reference.is_some() {
        AccessMode::Verify
    } else {
        AccessMode::Store
    };

    let mut memory = MemoryTarget::ram(0, usize::try_from(size).unwrap_or(usize::MAX));
    if let Some(bytes) = &reference {
        memory.load(0, bytes);
        memory.reset();
    }

    let download = DownloadConfig {
        mode,
        base_address: base,
        offset: opts.offset,
        embedded_commands: opts.embedded_commands,
    };

    let io = serial::open_port(cli, config)?;
    ensure_not_interrupted()?;
    if !cli.quiet {
        eprintln!(
            "{} Waiting for {} ({} mode)...",
            style("⏳").yellow(),
            if opts.lines { "record lines" } else { "Xmodem sender" },
            if mode == AccessMode::Verify { "verify" } else { "store" }
        );
    }

    let mut link = Link::new(io, config.xmodem_config());
    let summary = {
        let mut downloader =
            Downloader::with_executor(&mut memory, download, HostCommands::default());
        if opts.lines {
            let mut reader = LineReader::default();
            downloader.download_lines(&mut reader, link.transport_mut())?;
        } else {
            receive_xmodem(cli, &mut link, &mut downloader, mode, opts.offset)?;
        }
        let seen = &downloader.commands().executor().seen;
        if !seen.is_empty() {
            debug!("Embedded commands: {seen:?}");
        }
        downloader.summary()
    };
    if link.transport_mut().take_overrun() {
        debug!("Cleared receive overrun status");
    }

    if !cli.quiet {
        print_summary(&summary, mode);
    }

    if let Some(path) = &opts.output {
        fs::write(path, memory.image())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} bytes to {}", memory.len(), path.display());
    }

    if !summary.is_clean() {
        anyhow::bail!(if summary.terminated {
            "Transfer completed with errors"
        } else {
            "Transfer ended without a terminator record"
        });
    }
    if !cli.quiet {
        let done = if mode == AccessMode::Verify {
            "Image matches"
        } else {
            "Image received"
        };
        eprintln!("{} {done}", style("✓").green().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdulink::protocol::xmodem::control;
    use rdulink::{QueueTransport, XmodemConfig, crc16_xmodem};

    #[test]
    fn test_offset_command_moves_offset() {
        let mut commands = HostCommands::default();
        let mut output = String::new();
        let mut offset = 0;
        commands.execute("OFFSET 0100", &mut output, &mut offset);
        assert_eq!(offset, 0x0100);
        assert_eq!(output, "OFFSET=0100\n");

        commands.execute("offset zz", &mut output, &mut offset);
        assert_eq!(offset, 0x0100);
        assert!(output.contains("bad offset"));

        commands.execute("STATUS", &mut output, &mut offset);
        assert_eq!(commands.seen, vec!["OFFSET 0100", "offset zz", "STATUS"]);
    }

    #[test]
    fn test_embedded_offset_relocates_data() {
        let mut memory = MemoryTarget::ram(0, 0x200);
        let config = DownloadConfig {
            embedded_commands: true,
            ..DownloadConfig::default()
        };
        let mut downloader =
            Downloader::with_executor(&mut memory, config, HostCommands::default());
        downloader.decode_line("S00F00004F464653455420303130303B0D");
        assert_eq!(downloader.offset(), 0x0100);
        assert_eq!(
            downloader.decode_line("S1070000DEADBEEFC0"),
            LineStatus::Applied {
                address: 0x100,
                len: 4
            }
        );
        drop(downloader);
        assert_eq!(memory.read(0x100), Some(0xDE));
    }

    #[test]
    fn test_receive_xmodem_applies_packets() {
        let cli = <Cli as clap::Parser>::parse_from(["rdulink", "-q", "receive"]);
        let mut payload = b"S1070000DEADBEEFC0\r\nS9030000FC\r\n".to_vec();
        payload.resize(128, control::SUB);
        let mut frame = vec![control::SOH, 1, 0xFE];
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc16_xmodem(&payload).to_be_bytes());
        frame.push(control::EOT);

        let mut link = Link::new(QueueTransport::with_input(&frame), XmodemConfig::default());
        let mut memory = MemoryTarget::ram(0, 0x10);
        let summary = {
            let mut downloader = Downloader::new(&mut memory, DownloadConfig::default());
            receive_xmodem(&cli, &mut link, &mut downloader, AccessMode::Store, 0).unwrap();
            downloader.summary()
        };
        assert!(summary.is_clean(), "{summary:?}");
        assert_eq!(&memory.image()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        // One ACK for the packet, one for EOT.
        assert!(
            link.transport_mut()
                .take_written()
                .ends_with(&[control::ACK, control::ACK])
        );
    }
}
