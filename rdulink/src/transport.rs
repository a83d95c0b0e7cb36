//! Character transport abstraction.
//!
//! The protocol engines only ever see a byte-oriented duplex channel:
//!
//! ```text
//! +------------------+     +------------------+
//! |  Xmodem engine   |     |  Line reader     |
//! |  (non-blocking)  |     |  (spins on read) |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+------------------------+---------+
//! |              Transport trait              |
//! +--------+------------------------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |  QueueTransport  |     |  SerialTransport |
//! |  (in-memory)     |     | (RxQueue + port) |
//! +------------------+     +------------------+
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::trace;

use crate::error::{Error, Result};

/// XON (DC1): resume transmission.
pub const XON: u8 = 0x11;

/// XOFF (DC3): pause transmission.
pub const XOFF: u8 = 0x13;

/// Byte-oriented duplex channel consumed by the protocol engines.
pub trait Transport {
    /// Take one received byte if one is waiting.
    fn read_nonblocking(&mut self) -> Option<u8>;

    /// Whether a received byte is waiting.
    fn has_byte(&self) -> bool;

    /// Queue one byte for transmission.
    fn write(&mut self, byte: u8);

    /// Queue a run of bytes for transmission.
    fn write_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write(b);
        }
    }

    /// Ask the peer to pause sending (software flow control).
    fn assert_xoff(&mut self) {}

    /// Allow the peer to resume sending.
    fn assert_xon(&mut self) {}

    /// Whether the peer on this transport can take part in a transfer session.
    fn supports_session(&self) -> bool {
        true
    }

    /// Whether the sticky receive-overrun status is set. Does not clear it.
    fn overrun(&self) -> bool {
        false
    }

    /// Return and clear the sticky receive-overrun status.
    ///
    /// Clearing is left to the embedding application; the engines only peek.
    fn take_overrun(&mut self) -> bool {
        false
    }

    /// Spin until a byte is available.
    ///
    /// This is the only blocking primitive in the crate and is reserved for
    /// line-oriented record capture.
    fn read_blocking(&mut self) -> Result<u8> {
        loop {
            if let Some(b) = self.read_nonblocking() {
                return Ok(b);
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            std::hint::spin_loop();
        }
    }
}

/// Number of slots in an [`RxQueue`].
pub const RX_QUEUE_SIZE: usize = 256;

/// Interrupt-fed receive ring.
///
/// Single producer (the receive interrupt) and single consumer (the
/// foreground loop). The producer only ever stores `head` and the consumer
/// only ever stores `tail`, so no lock is needed provided that 8-bit loads
/// and stores are atomic on the target. Both cursors wrap naturally at 256.
/// One slot is kept free to tell a full ring from an empty one.
pub struct RxQueue {
    slots: [AtomicU8; RX_QUEUE_SIZE],
    head: AtomicU8,
    tail: AtomicU8,
    overrun: AtomicBool,
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RxQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU8::new(0)),
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
            overrun: AtomicBool::new(false),
        }
    }

    /// Producer side: enqueue a received byte.
    ///
    /// Returns `false` and raises the overrun flag if the ring is full; the
    /// byte is dropped.
    pub fn push(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = head.wrapping_add(1);
        if next == self.tail.load(Ordering::Acquire) {
            self.overrun.store(true, Ordering::Relaxed);
            return false;
        }
        self.slots[usize::from(head)].store(byte, Ordering::Relaxed);
        self.head.store(next, Ordering::Release);
        true
    }

    /// Consumer side: dequeue the oldest byte.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.slots[usize::from(tail)].load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Whether no byte is waiting.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Number of bytes waiting.
    pub fn len(&self) -> usize {
        usize::from(
            self.head
                .load(Ordering::Acquire)
                .wrapping_sub(self.tail.load(Ordering::Acquire)),
        )
    }

    /// Number of bytes that can be pushed before the ring is full.
    pub fn free(&self) -> usize {
        RX_QUEUE_SIZE - 1 - self.len()
    }

    /// Whether a byte has been dropped since the flag was last taken.
    pub fn overrun(&self) -> bool {
        self.overrun.load(Ordering::Relaxed)
    }

    /// Return and clear the sticky overrun flag.
    pub fn take_overrun(&self) -> bool {
        self.overrun.swap(false, Ordering::Relaxed)
    }
}

/// In-memory transport: a byte queue for input and a log of written bytes.
///
/// Input is unbounded, standing in for a peer that already delivered a whole
/// exchange.
#[derive(Debug, Default)]
pub struct QueueTransport {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    xoff: bool,
    overrun: bool,
}

impl QueueTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with `input` already received.
    pub fn with_input(input: &[u8]) -> Self {
        let mut transport = Self::new();
        transport.inject(input);
        transport
    }

    /// Deliver bytes as if they arrived from the peer.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Number of received bytes not yet read.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    /// Take and clear the bytes written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }

    /// Whether XOFF is currently asserted.
    pub fn is_xoff(&self) -> bool {
        self.xoff
    }

    /// Raise the sticky overrun status, as if the peer outran the receiver.
    pub fn raise_overrun(&mut self) {
        self.overrun = true;
    }
}

impl Transport for QueueTransport {
    fn read_nonblocking(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn has_byte(&self) -> bool {
        !self.rx.is_empty()
    }

    fn write(&mut self, byte: u8) {
        trace!("tx 0x{byte:02X}");
        self.tx.push(byte);
    }

    fn assert_xoff(&mut self) {
        self.xoff = true;
    }

    fn assert_xon(&mut self) {
        self.xoff = false;
    }

    fn overrun(&self) -> bool {
        self.overrun
    }

    fn take_overrun(&mut self) -> bool {
        std::mem::take(&mut self.overrun)
    }

    fn read_blocking(&mut self) -> Result<u8> {
        // Nothing can refill an in-memory queue while we spin on it.
        self.rx
            .pop_front()
            .ok_or_else(|| Error::Timeout("receive queue drained".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo_order() {
        let q = RxQueue::new();
        assert!(q.is_empty());
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.push(3));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_queue_overrun_is_sticky_until_taken() {
        let q = RxQueue::new();
        for i in 0..RX_QUEUE_SIZE - 1 {
            assert!(q.push(i as u8));
        }
        assert!(!q.push(0xAA));
        assert!(!q.push(0xBB));
        assert_eq!(q.len(), RX_QUEUE_SIZE - 1);
        assert!(q.overrun());
        assert!(q.take_overrun());
        assert!(!q.overrun());
        assert!(!q.take_overrun());
        // Oldest byte survives the overrun.
        assert_eq!(q.pop(), Some(0));
    }

    #[test]
    fn test_queue_cursors_wrap() {
        let q = RxQueue::new();
        for round in 0..1000u32 {
            assert!(q.push(round as u8));
            assert_eq!(q.pop(), Some(round as u8));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_queue_transport_records_writes_and_flow_control() {
        let mut t = QueueTransport::with_input(b"AB");
        assert!(t.has_byte());
        assert_eq!(t.read_nonblocking(), Some(b'A'));
        assert_eq!(t.read_blocking().unwrap(), b'B');
        assert!(t.read_blocking().is_err());

        t.write_all(b"xy");
        assert_eq!(t.written(), b"xy");
        t.assert_xoff();
        assert!(t.is_xoff());
        t.assert_xon();
        assert!(!t.is_xoff());
        assert_eq!(t.take_written(), b"xy".to_vec());
        assert!(t.written().is_empty());
    }
}
