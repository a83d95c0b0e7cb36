//! Record download driver.
//!
//! Decodes record lines and routes them: data records to the memory target,
//! comment-type records to the command channel (or back to the caller as
//! text), terminators end the session. Record faults and memory faults are
//! reported per line and counted; neither stops the download.
//!
//! Lines arrive either straight from the transport ([`Downloader::download_lines`])
//! or reassembled from Xmodem payloads ([`Downloader::feed_packet`]).

use log::{debug, trace, warn};

use crate::command::{CommandChannel, CommandEvent, CommandExecutor, NoopExecutor};
use crate::error::{Error, Result};
use crate::memory::{AccessMode, ByteStore, FaultStatus, MemoryTarget, RamStore};
use crate::protocol::record::{
    self, LineAssembler, LineEvent, LineReader, RecordError, RecordKind,
};
use crate::transport::Transport;

/// Per-session download settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DownloadConfig {
    /// Store or verify.
    pub mode: AccessMode,
    /// Record address that maps to `offset` on the target.
    pub base_address: u32,
    /// Relocation added to every data address.
    pub offset: u16,
    /// Route comment-type records to the command channel.
    pub embedded_commands: bool,
}

/// Outcome of one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    /// Data applied to the memory target.
    Applied {
        /// First target address written or verified.
        address: u32,
        /// Number of bytes.
        len: usize,
    },
    /// Comment-type record text (embedded commands disabled).
    Comment(String),
    /// Comment-type record fed to the command channel.
    Command {
        /// Commands run while consuming this record.
        executed: usize,
        /// Overflowed commands discarded while consuming this record.
        suppressed: usize,
        /// Executor output produced.
        output: String,
    },
    /// A record with nothing to apply (record counts).
    Skipped,
    /// The session has ended; the line was a terminator or came after one.
    Terminated,
    /// The line is malformed; nothing was applied.
    FormatError(RecordError),
    /// The record checksum did not match; nothing was applied.
    ChecksumError {
        /// Checksum on the line.
        expected: u8,
        /// Checksum computed from the record.
        computed: u8,
    },
}

/// Counters for one download session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownloadSummary {
    /// Data records applied.
    pub records: usize,
    /// Data bytes applied.
    pub bytes: usize,
    /// Comment-type records seen.
    pub comments: usize,
    /// Embedded commands executed.
    pub commands: usize,
    /// Embedded commands suppressed after overflow.
    pub suppressed_commands: usize,
    /// Lines rejected as malformed (including over-long lines).
    pub format_errors: usize,
    /// Lines rejected for a checksum mismatch.
    pub checksum_errors: usize,
    /// Whether a terminator record was seen.
    pub terminated: bool,
    /// Whether the transport reported a receive overrun during line capture.
    pub overrun: bool,
    /// Memory fault state at the time of the summary.
    pub faults: FaultStatus,
}

impl DownloadSummary {
    /// Whether the image arrived complete and without any fault.
    pub fn is_clean(&self) -> bool {
        self.terminated
            && self.format_errors == 0
            && self.checksum_errors == 0
            && self.suppressed_commands == 0
            && !self.overrun
            && self.faults.is_clean()
    }
}

/// Download session over a borrowed memory target.
pub struct Downloader<'m, S: ByteStore = RamStore, E = NoopExecutor> {
    memory: &'m mut MemoryTarget<S>,
    config: DownloadConfig,
    offset: u16,
    commands: CommandChannel<E>,
    assembler: LineAssembler,
    summary: DownloadSummary,
}

impl<'m, S: ByteStore> Downloader<'m, S, NoopExecutor> {
    /// Downloader whose embedded commands are ignored.
    pub fn new(memory: &'m mut MemoryTarget<S>, config: DownloadConfig) -> Self {
        Self::with_executor(memory, config, NoopExecutor)
    }
}

impl<'m, S: ByteStore, E: CommandExecutor> Downloader<'m, S, E> {
    /// Downloader handing embedded commands to `executor`.
    pub fn with_executor(
        memory: &'m mut MemoryTarget<S>,
        config: DownloadConfig,
        executor: E,
    ) -> Self {
        Self {
            memory,
            offset: config.offset,
            config,
            commands: CommandChannel::new(executor),
            assembler: LineAssembler::default(),
            summary: DownloadSummary::default(),
        }
    }

    /// Current relocation offset (embedded commands may change it).
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Whether a terminator has ended the session.
    pub fn is_terminated(&self) -> bool {
        self.summary.terminated
    }

    /// The command channel.
    pub fn commands(&self) -> &CommandChannel<E> {
        &self.commands
    }

    /// Counters so far, with the current memory fault state.
    pub fn summary(&self) -> DownloadSummary {
        DownloadSummary {
            faults: self.memory.fault_status(),
            ..self.summary.clone()
        }
    }

    /// Decode one record line and apply it.
    pub fn decode_line(&mut self, line: &str) -> LineStatus {
        if self.summary.terminated {
            trace!("download: ignoring line after terminator");
            return LineStatus::Terminated;
        }

        let record = match record::decode_line(line) {
            Ok(record) => record,
            Err(RecordError::Checksum { expected, computed }) => {
                warn!("download: checksum mismatch in {line}");
                self.summary.checksum_errors += 1;
                return LineStatus::ChecksumError { expected, computed };
            },
            Err(err) => {
                warn!("download: {err} in {line}");
                self.summary.format_errors += 1;
                return LineStatus::FormatError(err);
            },
        };

        match record.kind {
            RecordKind::Data => {
                let address = record
                    .address
                    .wrapping_sub(self.config.base_address)
                    .wrapping_add(u32::from(self.offset));
                for (i, &b) in (0u32..).zip(&record.data) {
                    self.memory
                        .apply(self.config.mode, address.wrapping_add(i), b);
                }
                self.summary.records += 1;
                self.summary.bytes += record.data.len();
                trace!(
                    "download: {} byte(s) at 0x{address:08X}",
                    record.data.len()
                );
                LineStatus::Applied {
                    address,
                    len: record.data.len(),
                }
            },
            RecordKind::Comment => {
                self.summary.comments += 1;
                if self.config.embedded_commands {
                    self.run_commands(&record.data)
                } else {
                    LineStatus::Comment(String::from_utf8_lossy(&record.data).into_owned())
                }
            },
            RecordKind::Count => LineStatus::Skipped,
            RecordKind::Terminator => {
                debug!("download: terminator record, session complete");
                self.summary.terminated = true;
                LineStatus::Terminated
            },
        }
    }

    fn run_commands(&mut self, payload: &[u8]) -> LineStatus {
        let mut executed = 0;
        let mut suppressed = 0;
        for &b in payload {
            match self.commands.push(b, &mut self.offset) {
                CommandEvent::Executed => executed += 1,
                CommandEvent::Suppressed => suppressed += 1,
                CommandEvent::Pending => {},
            }
        }
        self.commands.end_record();
        self.summary.commands += executed;
        self.summary.suppressed_commands += suppressed;
        LineStatus::Command {
            executed,
            suppressed,
            output: self.commands.take_output(),
        }
    }

    /// Line-mode download: read and apply lines until a terminator.
    ///
    /// An abort character from the peer ends the session with
    /// [`Error::Aborted`]. A transport overrun is recorded in the summary;
    /// the transport's flag stays set for the caller to take.
    pub fn download_lines<T: Transport>(
        &mut self,
        reader: &mut LineReader,
        io: &mut T,
    ) -> Result<DownloadSummary> {
        while !self.summary.terminated {
            let event = reader.read_line(io)?;
            if !self.summary.overrun && io.overrun() {
                warn!("download: receive overrun, lines may be missing");
                self.summary.overrun = true;
            }
            match event {
                LineEvent::Line(line) => {
                    self.decode_line(&line);
                },
                LineEvent::Overflow => {
                    warn!("download: line too long, discarded");
                    self.summary.format_errors += 1;
                },
                LineEvent::Abort => {
                    return Err(Error::Aborted("abort character received".into()));
                },
                LineEvent::Pending => {},
            }
        }
        Ok(self.summary())
    }

    /// Feed one reassembled Xmodem payload; returns the status of every line
    /// it completed. Pad bytes are dropped by the line assembler.
    pub fn feed_packet(&mut self, payload: &[u8]) -> Vec<LineStatus> {
        let mut statuses = Vec::new();
        for &b in payload {
            match self.assembler.push(b) {
                LineEvent::Line(line) => statuses.push(self.decode_line(&line)),
                LineEvent::Overflow => {
                    warn!("download: line too long, discarded");
                    self.summary.format_errors += 1;
                },
                LineEvent::Abort => {
                    warn!("download: abort character inside packet, line dropped");
                },
                LineEvent::Pending => {},
            }
        }
        statuses
    }

    /// Decode a trailing line that was not followed by a line break.
    pub fn flush(&mut self) -> Option<LineStatus> {
        match self.assembler.push(b'\n') {
            LineEvent::Line(line) => Some(self.decode_line(&line)),
            LineEvent::Overflow => {
                self.summary.format_errors += 1;
                None
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FaultFlags;
    use crate::transport::QueueTransport;

    #[test]
    fn test_data_is_relocated() {
        let mut mem = MemoryTarget::ram(0, 0x400);
        let config = DownloadConfig {
            base_address: 0x0100,
            offset: 0x0200,
            ..DownloadConfig::default()
        };
        let mut dl = Downloader::new(&mut mem, config);
        assert_eq!(
            dl.decode_line("S1070100DEADBEEFBF"),
            LineStatus::Applied {
                address: 0x0200,
                len: 4
            }
        );
        drop(dl);
        assert_eq!(mem.read(0x0203), Some(0xEF));
    }

    #[test]
    fn test_checksum_error_applies_nothing() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        assert_eq!(
            dl.decode_line("S10500200102D8"),
            LineStatus::ChecksumError {
                expected: 0xD8,
                computed: 0xD7
            }
        );
        assert!(matches!(
            dl.decode_line("S10500200102"),
            LineStatus::FormatError(RecordError::Truncated { .. })
        ));
        let summary = dl.summary();
        assert_eq!(summary.checksum_errors, 1);
        assert_eq!(summary.format_errors, 1);
        assert_eq!(summary.records, 0);
        drop(dl);
        assert_eq!(mem.read(0x20), Some(0xFF));
    }

    #[test]
    fn test_comment_echo_and_count_skip() {
        let mut mem = MemoryTarget::ram(0, 0x10);
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        assert_eq!(
            dl.decode_line("S00600006D6174B7"),
            LineStatus::Comment("mat".into())
        );
        assert_eq!(dl.decode_line("S5030003F9"), LineStatus::Skipped);
        assert_eq!(dl.summary().comments, 1);
    }

    #[test]
    fn test_lines_after_terminator_are_ignored() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        assert_eq!(dl.decode_line(":00000001FF"), LineStatus::Terminated);
        assert_eq!(dl.decode_line("S10500200102D7"), LineStatus::Terminated);
        assert!(dl.is_terminated());
        assert_eq!(dl.summary().records, 0);
    }

    #[test]
    fn test_verify_mode_reports_mismatch_and_continues() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        mem.load(0x20, &[0x01, 0x00]);
        let config = DownloadConfig {
            mode: AccessMode::Verify,
            ..DownloadConfig::default()
        };
        let mut dl = Downloader::new(&mut mem, config);
        dl.decode_line("S10500200102D7");
        dl.decode_line("S9030000FC");
        let summary = dl.summary();
        assert!(summary.terminated);
        assert_eq!(summary.faults.flags, FaultFlags::VERIFY);
        assert_eq!(summary.faults.first_fault, Some(0x21));
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_embedded_command_offset_applies_to_later_records() {
        let mut mem = MemoryTarget::ram(0, 0x200);
        let config = DownloadConfig {
            embedded_commands: true,
            ..DownloadConfig::default()
        };
        let executor = |line: &str, out: &mut String, offset: &mut u16| {
            if let Some(v) = line.strip_prefix("OFFSET ") {
                *offset = u16::from_str_radix(v, 16).unwrap_or(*offset);
                out.push_str("offset set");
            }
        };
        let mut dl = Downloader::with_executor(&mut mem, config, executor);
        assert_eq!(
            dl.decode_line("S00F00004F464653455420303130303B0D"),
            LineStatus::Command {
                executed: 1,
                suppressed: 0,
                output: "offset set".into()
            }
        );
        assert_eq!(dl.offset(), 0x0100);
        assert_eq!(
            dl.decode_line("S10500200102D7"),
            LineStatus::Applied {
                address: 0x0120,
                len: 2
            }
        );
    }

    #[test]
    fn test_download_lines_until_terminator() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut io = QueueTransport::with_input(
            b"S10500200102D7\r\nS104002103D7\r\nbogus\r\nS9030000FC\r\nS104002204D5\r\n",
        );
        let mut reader = LineReader::default();
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        let summary = dl.download_lines(&mut reader, &mut io).unwrap();
        assert!(summary.terminated);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.format_errors, 1);
        drop(dl);
        assert_eq!(mem.read(0x21), Some(0x03));
        assert_eq!(mem.read(0x22), Some(0xFF));
        // Flow control is left paused after the last line.
        assert!(io.is_xoff());
    }

    #[test]
    fn test_download_lines_records_overrun_without_clearing_it() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut io = QueueTransport::with_input(b"S10500200102D7\r\nS9030000FC\r\n");
        io.raise_overrun();
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        let summary = dl
            .download_lines(&mut LineReader::default(), &mut io)
            .unwrap();
        assert!(summary.overrun);
        assert!(summary.terminated);
        assert!(!summary.is_clean());
        assert!(io.take_overrun());
    }

    #[test]
    fn test_download_lines_abort_character() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut io = QueueTransport::with_input(b"S10500200102D7\r\nS1\x1b");
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        let err = dl
            .download_lines(&mut LineReader::default(), &mut io)
            .unwrap_err();
        assert!(matches!(err, Error::Aborted(_)));
        assert_eq!(dl.summary().records, 1);
    }

    #[test]
    fn test_packets_are_reassembled_into_lines() {
        let mut mem = MemoryTarget::ram(0, 0x100);
        let mut dl = Downloader::new(&mut mem, DownloadConfig::default());
        let text = b"S10500200102D7\r\nS1040021";
        assert!(dl.feed_packet(&text[..]).len() == 1);

        let mut tail = b"03D7\r\nS9030000FC".to_vec();
        tail.resize(128, crate::protocol::xmodem::control::SUB);
        let statuses = dl.feed_packet(&tail);
        assert_eq!(
            statuses,
            vec![LineStatus::Applied {
                address: 0x21,
                len: 1
            }]
        );
        assert_eq!(dl.flush(), Some(LineStatus::Terminated));
        assert!(dl.summary().is_clean());
    }
}
