//! Line capture for record text.

use log::{debug, trace};

use crate::error::Result;
use crate::protocol::xmodem::control;
use crate::transport::Transport;

/// Default line capacity: enough for an S3 record with 251 data bytes.
pub const DEFAULT_LINE_CAPACITY: usize = 520;

/// Outcome of feeding one byte to a [`LineAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// The line is still being captured.
    Pending,
    /// A complete, upper-cased line (terminator not included).
    Line(String),
    /// The line ran past the capacity and was discarded.
    Overflow,
    /// An abort character (ESC or Ctrl-C) was received.
    Abort,
}

/// Push-driven line capture.
///
/// Keeps printable ASCII only, upper-cased. CR or LF ends a line; blank lines
/// are skipped. A line longer than the capacity is discarded in full and
/// reported as [`LineEvent::Overflow`] when its terminator arrives.
#[derive(Debug, Clone)]
pub struct LineAssembler {
    buf: String,
    capacity: usize,
    overflowed: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_CAPACITY)
    }
}

impl LineAssembler {
    /// Create an assembler holding at most `capacity` characters per line.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    /// Feed one received byte.
    pub fn push(&mut self, byte: u8) -> LineEvent {
        match byte {
            b'\r' | b'\n' => {
                if self.overflowed {
                    self.overflowed = false;
                    self.buf.clear();
                    return LineEvent::Overflow;
                }
                if self.buf.is_empty() {
                    return LineEvent::Pending;
                }
                let line = std::mem::replace(&mut self.buf, String::with_capacity(self.capacity));
                LineEvent::Line(line)
            },
            control::ESC | control::ETX => {
                self.clear();
                LineEvent::Abort
            },
            0x20..=0x7E => {
                if self.overflowed {
                    return LineEvent::Pending;
                }
                if self.buf.len() == self.capacity {
                    debug!("line exceeds {} characters, discarding", self.capacity);
                    self.overflowed = true;
                    return LineEvent::Pending;
                }
                self.buf.push(char::from(byte.to_ascii_uppercase()));
                LineEvent::Pending
            },
            _ => {
                trace!("dropping non-printable 0x{byte:02X}");
                LineEvent::Pending
            },
        }
    }

    /// Discard any partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    /// Characters captured so far on the current line.
    pub fn partial(&self) -> &str {
        &self.buf
    }
}

/// Blocking line reader over a [`Transport`].
///
/// XON is asserted while waiting for a line and XOFF once a complete line has
/// been captured, so the peer pauses while the line is processed.
#[derive(Debug, Clone, Default)]
pub struct LineReader {
    assembler: LineAssembler,
}

impl LineReader {
    /// Create a reader with the given line capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            assembler: LineAssembler::new(capacity),
        }
    }

    /// Capture the next line; never returns [`LineEvent::Pending`].
    pub fn read_line<T: Transport>(&mut self, io: &mut T) -> Result<LineEvent> {
        io.assert_xon();
        loop {
            let byte = io.read_blocking()?;
            match self.assembler.push(byte) {
                LineEvent::Pending => {},
                LineEvent::Line(line) => {
                    io.assert_xoff();
                    return Ok(LineEvent::Line(line));
                },
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QueueTransport;

    fn feed(asm: &mut LineAssembler, bytes: &[u8]) -> Vec<LineEvent> {
        bytes
            .iter()
            .map(|&b| asm.push(b))
            .filter(|e| *e != LineEvent::Pending)
            .collect()
    }

    #[test]
    fn test_lines_are_uppercased_and_split() {
        let mut asm = LineAssembler::default();
        let events = feed(&mut asm, b"s9030000fc\r\n:00000001ff\n");
        assert_eq!(
            events,
            vec![
                LineEvent::Line("S9030000FC".into()),
                LineEvent::Line(":00000001FF".into())
            ]
        );
    }

    #[test]
    fn test_non_printable_bytes_are_dropped() {
        let mut asm = LineAssembler::default();
        let events = feed(&mut asm, b"S9\x1a\x1a03\x000000FC\n");
        assert_eq!(events, vec![LineEvent::Line("S9030000FC".into())]);
    }

    #[test]
    fn test_overflow_discards_whole_line() {
        let mut asm = LineAssembler::new(4);
        let events = feed(&mut asm, b"ABCDEFGH\nXY\n");
        assert_eq!(
            events,
            vec![LineEvent::Overflow, LineEvent::Line("XY".into())]
        );
    }

    #[test]
    fn test_abort_character_clears_partial_line() {
        let mut asm = LineAssembler::default();
        assert_eq!(feed(&mut asm, b"S1\x1b"), vec![LineEvent::Abort]);
        assert_eq!(asm.partial(), "");
        assert_eq!(feed(&mut asm, b"\x03"), vec![LineEvent::Abort]);
    }

    #[test]
    fn test_reader_toggles_flow_control() {
        let mut io = QueueTransport::with_input(b"\r\nS9030000FC\r\n");
        let mut reader = LineReader::default();
        io.assert_xon();
        let line = reader.read_line(&mut io).unwrap();
        assert_eq!(line, LineEvent::Line("S9030000FC".into()));
        assert!(io.is_xoff());

        // The trailing LF is consumed on the next read, which then runs dry.
        assert!(reader.read_line(&mut io).is_err());
        assert!(!io.is_xoff());
    }
}
