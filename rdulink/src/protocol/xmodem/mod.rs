//! Xmodem-style link protocol.
//!
//! Two independent, non-blocking state machines move 128-byte packets over a
//! half-duplex [`Transport`](crate::transport::Transport):
//!
//! ```text
//! Packet format:
//! +-----+-----+------+--------------+-----------------+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | SUM (1)/CRC (2) |
//! +-----+-----+------+--------------+-----------------+
//! ```
//!
//! - [`Receiver`] requests the transfer ('C' for CRC-16, NAK for the 8-bit
//!   sum), validates each packet and hands the payload to the caller.
//! - [`Sender`] waits for the receiver's opening request, frames the caller's
//!   bytes into packets and retries on NAK or silence.
//!
//! Time only advances through `tick()`; every wait is a countdown checked on
//! the next `poll()`. Checksum mismatches and duplicate packets are recovered
//! locally. Only cancel and retry exhaustion end a session early.

mod rx;
mod tx;

pub use rx::{Receiver, RxEvent, RxState};
pub use tx::{Sender, TxEvent, TxState, TxStatus};

use log::trace;

use crate::timer::Countdown;
use crate::transport::Transport;

/// Xmodem control characters.
pub mod control {
    /// Start of Header (128-byte packet).
    pub const SOH: u8 = 0x01;
    /// End of Text (Ctrl-C), treated as an abort key in line mode.
    pub const ETX: u8 = 0x03;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Substitute, used to pad the last packet.
    pub const SUB: u8 = 0x1A;
    /// Escape, accepted as a cancel from the receiver.
    pub const ESC: u8 = 0x1B;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Payload bytes per packet.
pub const PACKET_SIZE: usize = 128;

/// Largest frame on the wire: SOH, SEQ, ~SEQ, payload, CRC.
pub const FRAME_MAX: usize = 3 + PACKET_SIZE + 2;

/// Xmodem timing and retry settings, in ticks (1 tick ≈ 1 ms).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct XmodemConfig {
    /// Receiver: interval between start/restart requests.
    pub start_timeout: u32,
    /// Receiver: longest gap allowed between bytes of one packet.
    pub char_timeout: u32,
    /// Sender: wait for ACK/NAK after a packet or EOT.
    pub ack_timeout: u32,
    /// Sender: wait for the receiver's opening request, per attempt.
    pub ready_timeout: u32,
    /// Receiver: number of 'C' requests before falling back to the 8-bit sum.
    pub crc_attempts: u8,
    /// Attempts per packet (or per start request) before the session aborts.
    pub retry_budget: u8,
    /// Silence required on the line before an abort completes.
    pub quiet_period: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            start_timeout: 3000,
            char_timeout: 1000,
            ack_timeout: 10_000,
            ready_timeout: 10_000,
            crc_attempts: 3,
            retry_budget: 10,
            quiet_period: 1000,
        }
    }
}

/// Shared abort handling: drain the line, re-send CAN on any traffic, and
/// report completion once `quiet` has run out with nothing received.
fn drain_abort<T: Transport>(io: &mut T, quiet: &mut Countdown, quiet_period: u32) -> bool {
    let mut seen = 0usize;
    while io.read_nonblocking().is_some() {
        seen += 1;
    }
    if seen > 0 {
        trace!("abort: drained {seen} byte(s), re-sending CAN");
        io.write(control::CAN);
        quiet.arm(quiet_period);
        return false;
    }
    quiet.expired()
}
