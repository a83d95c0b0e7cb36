//! Embedded command channel.
//!
//! Comment-type records (S0, Intel types other than 00/01) may carry command
//! text instead of a header. Their payload bytes are pushed into a bounded
//! [`CommandBuffer`]; each delimiter hands the collected text to a
//! [`CommandExecutor`]. A command that overflowed the buffer is never run,
//! not even in truncated form, and neither is text left unterminated at the
//! end of a record.

use log::{debug, warn};

/// Default command buffer capacity in bytes.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default command delimiters.
pub const DEFAULT_DELIMITERS: &[u8] = b";\r\n";

/// External command interpreter.
///
/// `output` collects any text the command produces. `offset` is the session
/// relocation offset, which a command may change for the rest of the
/// download.
pub trait CommandExecutor {
    /// Run one command line.
    fn execute(&mut self, line: &str, output: &mut String, offset: &mut u16);
}

impl<F> CommandExecutor for F
where
    F: FnMut(&str, &mut String, &mut u16),
{
    fn execute(&mut self, line: &str, output: &mut String, offset: &mut u16) {
        self(line, output, offset);
    }
}

/// Executor that ignores every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

impl CommandExecutor for NoopExecutor {
    fn execute(&mut self, line: &str, _output: &mut String, _offset: &mut u16) {
        debug!("command ignored: {line}");
    }
}

/// Bounded accumulator with a sticky overflow flag.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_CAPACITY)
    }
}

impl CommandBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    /// Append a byte; sets the overflow flag once the buffer is full.
    pub fn push(&mut self, byte: u8) {
        if self.bytes.len() < self.capacity {
            self.bytes.push(byte);
        } else {
            self.overflowed = true;
        }
    }

    /// Bytes collected so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes collected.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Maximum number of bytes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a byte was dropped since the last clear.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Empty the buffer and clear the overflow flag.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.overflowed = false;
    }
}

/// Outcome of pushing one byte into a [`CommandChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent {
    /// The byte was buffered (or an empty command was skipped).
    Pending,
    /// A delimiter ran the buffered command.
    Executed,
    /// A delimiter discarded an overflowed command.
    Suppressed,
}

/// Command buffer wired to an executor.
#[derive(Debug)]
pub struct CommandChannel<E> {
    buffer: CommandBuffer,
    executor: E,
    delimiters: Vec<u8>,
    output: String,
}

impl<E: CommandExecutor> CommandChannel<E> {
    /// Channel with the default capacity and delimiters.
    pub fn new(executor: E) -> Self {
        Self::with_capacity(executor, DEFAULT_COMMAND_CAPACITY)
    }

    /// Channel with a custom buffer capacity.
    pub fn with_capacity(executor: E, capacity: usize) -> Self {
        Self {
            buffer: CommandBuffer::new(capacity),
            executor,
            delimiters: DEFAULT_DELIMITERS.to_vec(),
            output: String::new(),
        }
    }

    /// Replace the set of delimiter bytes.
    #[must_use]
    pub fn with_delimiters(mut self, delimiters: &[u8]) -> Self {
        self.delimiters = delimiters.to_vec();
        self
    }

    /// Feed one byte from a comment-type record.
    pub fn push(&mut self, byte: u8, offset: &mut u16) -> CommandEvent {
        if !self.delimiters.contains(&byte) {
            self.buffer.push(byte);
            return CommandEvent::Pending;
        }

        if self.buffer.overflowed() {
            warn!(
                "command longer than {} bytes suppressed",
                self.buffer.capacity()
            );
            self.buffer.clear();
            return CommandEvent::Suppressed;
        }

        let line = String::from_utf8_lossy(self.buffer.as_bytes())
            .trim()
            .to_string();
        self.buffer.clear();
        if line.is_empty() {
            return CommandEvent::Pending;
        }

        debug!("executing embedded command: {line}");
        self.executor.execute(&line, &mut self.output, offset);
        CommandEvent::Executed
    }

    /// The pending command bytes.
    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    /// Drop any partly collected command.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Close the comment record that fed the channel.
    ///
    /// Commands never span records: text left without a delimiter (a plain
    /// header, say) is discarded. Returns whether anything was dropped.
    pub fn end_record(&mut self) -> bool {
        if self.buffer.is_empty() && !self.buffer.overflowed() {
            return false;
        }
        debug!(
            "dropping {} byte(s) of unterminated command text",
            self.buffer.len()
        );
        self.buffer.clear();
        true
    }

    /// Take the executor output collected so far.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// The wrapped executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
    }

    impl CommandExecutor for Recorder {
        fn execute(&mut self, line: &str, output: &mut String, offset: &mut u16) {
            self.lines.push(line.to_string());
            if let Some(value) = line.strip_prefix("OFFSET ") {
                *offset = u16::from_str_radix(value, 16).unwrap_or(*offset);
            }
            output.push_str("OK\n");
        }
    }

    fn push_all<E: CommandExecutor>(
        channel: &mut CommandChannel<E>,
        bytes: &[u8],
        offset: &mut u16,
    ) -> Vec<CommandEvent> {
        bytes
            .iter()
            .map(|&b| channel.push(b, offset))
            .filter(|e| *e != CommandEvent::Pending)
            .collect()
    }

    #[test]
    fn test_command_runs_once_per_delimiter() {
        let mut channel = CommandChannel::new(Recorder::default());
        let mut offset = 0;
        let events = push_all(&mut channel, b"RESET;", &mut offset);
        assert_eq!(events, vec![CommandEvent::Executed]);
        assert_eq!(channel.executor().lines, vec!["RESET"]);
        assert!(channel.buffer().is_empty());
        assert_eq!(channel.take_output(), "OK\n");
        assert_eq!(channel.take_output(), "");
    }

    #[test]
    fn test_executor_may_change_offset() {
        let mut channel = CommandChannel::new(Recorder::default());
        let mut offset = 0;
        push_all(&mut channel, b" OFFSET 0100 \r\n", &mut offset);
        assert_eq!(offset, 0x0100);
        assert_eq!(channel.executor().lines, vec!["OFFSET 0100"]);
    }

    #[test]
    fn test_empty_commands_are_skipped() {
        let mut channel = CommandChannel::new(Recorder::default());
        let mut offset = 0;
        assert!(push_all(&mut channel, b";;  ;\r\n", &mut offset).is_empty());
        assert!(channel.executor().lines.is_empty());
    }

    #[test]
    fn test_overflow_suppresses_and_clears() {
        let mut channel = CommandChannel::with_capacity(Recorder::default(), 8);
        let mut offset = 0;
        let events = push_all(&mut channel, b"ABCDEFGHIJ;STOP;", &mut offset);
        assert_eq!(events, vec![CommandEvent::Suppressed, CommandEvent::Executed]);
        assert_eq!(channel.executor().lines, vec!["STOP"]);
        assert!(!channel.buffer().overflowed());
    }

    #[test]
    fn test_custom_delimiters_and_closure_executor() {
        let mut seen = Vec::new();
        let mut offset = 0;
        {
            let mut channel = CommandChannel::new(|line: &str, _: &mut String, _: &mut u16| {
                seen.push(line.to_string());
            })
            .with_delimiters(b"|");
            push_all(&mut channel, b"A;B|C|", &mut offset);
        }
        assert_eq!(seen, vec!["A;B", "C"]);
    }

    #[test]
    fn test_end_record_drops_unterminated_text() {
        let mut channel = CommandChannel::new(Recorder::default());
        let mut offset = 0;
        push_all(&mut channel, b"mat", &mut offset);
        assert!(channel.end_record());
        assert!(channel.buffer().is_empty());
        assert!(!channel.end_record());

        push_all(&mut channel, b"RESET;", &mut offset);
        assert_eq!(channel.executor().lines, vec!["RESET"]);
    }

    #[test]
    fn test_buffer_overflow_flag_is_sticky() {
        let mut buffer = CommandBuffer::new(2);
        buffer.push(b'a');
        buffer.push(b'b');
        assert!(!buffer.overflowed());
        buffer.push(b'c');
        buffer.push(b'd');
        assert!(buffer.overflowed());
        assert_eq!(buffer.as_bytes(), b"ab");
        buffer.clear();
        assert!(!buffer.overflowed());
        assert!(buffer.is_empty());
    }
}
