//! Memory upload: encode a range and send it, as plain lines or through the
//! Xmodem sender.

use std::collections::VecDeque;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::link::TransmitSession;
use crate::protocol::xmodem::{TxEvent, TxStatus};
use crate::timer::Ticker;
use crate::transport::Transport;

/// Line ending written after every record.
pub const LINE_ENDING: &[u8] = b"\r\n";

/// Write record lines, each followed by CRLF; returns the number written.
///
/// Usually fed from [`RecordEncoder::encode_range`](crate::RecordEncoder::encode_range).
pub fn upload_lines<I, T>(lines: I, io: &mut T) -> Result<usize>
where
    I: IntoIterator<Item = String>,
    T: Transport,
{
    let mut count = 0;
    for line in lines {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        io.write_all(line.as_bytes());
        io.write_all(LINE_ENDING);
        count += 1;
    }
    debug!("upload: {count} line(s) written");
    Ok(count)
}

/// Feeds record lines into a transmit session.
#[derive(Debug)]
pub struct XmodemUpload<I> {
    lines: I,
    pending: VecDeque<u8>,
    exhausted: bool,
}

impl<I: Iterator<Item = String>> XmodemUpload<I> {
    /// Upload of every line `lines` yields.
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    fn refill(&mut self) -> bool {
        match self.lines.next() {
            Some(line) => {
                self.pending.extend(line.as_bytes());
                self.pending.extend(LINE_ENDING);
                true
            },
            None => false,
        }
    }

    /// Hand the session as many bytes as it accepts, then poll it once.
    pub fn step<T: Transport>(&mut self, session: &mut TransmitSession<'_, T>) -> TxEvent {
        while !self.exhausted {
            let Some(&byte) = self.pending.front() else {
                if !self.refill() {
                    self.exhausted = true;
                    session.finish();
                }
                continue;
            };
            match session.feed_byte(byte) {
                TxStatus::Accepted => {
                    self.pending.pop_front();
                },
                TxStatus::Busy | TxStatus::Done | TxStatus::Aborted => break,
            }
        }
        session.poll()
    }
}

/// Run an Xmodem upload to completion against the wall clock.
///
/// `on_packet` is called with the running packet count after each ACK.
/// Returns the number of packets sent.
pub fn upload_xmodem<I, T>(
    lines: I,
    session: &mut TransmitSession<'_, T>,
    mut on_packet: impl FnMut(usize),
) -> Result<usize>
where
    I: IntoIterator<Item = String>,
    T: Transport,
{
    let mut upload = XmodemUpload::new(lines.into_iter());
    let mut ticker = Ticker::new();
    loop {
        if crate::is_interrupted_requested() && !session.is_finished() {
            session.cancel();
        }
        session.tick(ticker.elapsed_ticks());
        match upload.step(session) {
            TxEvent::PacketAcked => on_packet(session.packets_acked()),
            TxEvent::Done => {
                info!("upload: {} packet(s) sent", session.packets_acked());
                return Ok(session.packets_acked());
            },
            TxEvent::Aborted => {
                if crate::is_interrupted_requested() {
                    return Err(Error::Interrupted);
                }
                return Err(Error::Aborted(format!(
                    "upload stopped after {} packet(s)",
                    session.packets_acked()
                )));
            },
            TxEvent::Idle => std::thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTarget;
    use crate::protocol::record::{RecordEncoder, SRecord};
    use crate::transport::QueueTransport;

    #[test]
    fn test_upload_lines_writes_crlf_records() {
        let mut mem = MemoryTarget::ram(0, 0x10);
        mem.load(0, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut io = QueueTransport::new();
        let encoder = RecordEncoder::new(&SRecord);
        let count = upload_lines(encoder.encode_range(&mem, 0, 3), &mut io).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            String::from_utf8(io.take_written()).unwrap(),
            "S1070000DEADBEEFC0\r\nS9030000FC\r\n"
        );
    }
}
