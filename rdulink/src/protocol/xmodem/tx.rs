//! Transmit state machine.

use log::{debug, trace, warn};

use super::{FRAME_MAX, PACKET_SIZE, XmodemConfig, control, drain_abort};
use crate::protocol::crc::Checksum;
use crate::timer::Countdown;
use crate::transport::Transport;

/// Sender states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Waiting for the receiver's NAK or 'C'.
    WaitReceiverReady,
    /// Accepting caller bytes into the packet slot.
    Filling,
    /// A packet is on the wire, waiting for ACK/NAK.
    AwaitingAck,
    /// EOT is on the wire, waiting for ACK.
    AwaitingEotAck,
    /// Cancelling: waiting for the line to go quiet.
    Abort,
    /// Abort complete (terminal).
    Aborted,
    /// EOT acknowledged (terminal).
    Done,
}

/// Result of [`Sender::feed_byte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The byte was placed in the packet slot.
    Accepted,
    /// The slot is full or closed; poll and try again.
    Busy,
    /// The transfer already finished.
    Done,
    /// The transfer aborted.
    Aborted,
}

/// Result of one [`Sender::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// Nothing new.
    Idle,
    /// The receiver acknowledged a packet.
    PacketAcked,
    /// The receiver acknowledged EOT.
    Done,
    /// The session aborted.
    Aborted,
}

/// Xmodem sender.
#[derive(Debug, Clone)]
pub struct Sender {
    config: XmodemConfig,
    state: TxState,
    checksum: Checksum,
    seq: u8,
    slot: [u8; PACKET_SIZE],
    filled: usize,
    last_chunk: bool,
    retries: u8,
    packets_acked: usize,
    timer: Countdown,
}

impl Sender {
    /// Create a sender waiting for the receiver to become ready.
    pub fn new(config: XmodemConfig) -> Self {
        let mut timer = Countdown::new();
        timer.arm(config.ready_timeout);
        Self {
            retries: config.retry_budget,
            config,
            state: TxState::WaitReceiverReady,
            checksum: Checksum::Crc16,
            seq: 1,
            slot: [0; PACKET_SIZE],
            filled: 0,
            last_chunk: false,
            packets_acked: 0,
            timer,
        }
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Check algorithm selected by the receiver.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Number of packets the receiver has acknowledged.
    pub fn packets_acked(&self) -> usize {
        self.packets_acked
    }

    /// Whether the session has ended (done or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self.state, TxState::Done | TxState::Aborted)
    }

    /// Advance the activity timer.
    pub fn tick(&mut self, ticks: u32) {
        self.timer.tick(ticks);
    }

    /// Offer one byte for transmission.
    pub fn feed_byte<T: Transport>(&mut self, io: &mut T, byte: u8) -> TxStatus {
        match self.state {
            TxState::Done => return TxStatus::Done,
            TxState::Abort | TxState::Aborted => return TxStatus::Aborted,
            _ => {},
        }
        if self.last_chunk || self.filled == PACKET_SIZE {
            return TxStatus::Busy;
        }

        self.slot[self.filled] = byte;
        self.filled += 1;
        if self.filled == PACKET_SIZE && self.state == TxState::Filling {
            self.send_packet(io);
        }
        TxStatus::Accepted
    }

    /// Mark the end of the data.
    ///
    /// A partly filled slot is padded with SUB and flushed before EOT.
    pub fn finish<T: Transport>(&mut self, io: &mut T) {
        if self.last_chunk
            || matches!(
                self.state,
                TxState::Abort | TxState::Aborted | TxState::Done
            )
        {
            return;
        }
        self.last_chunk = true;

        if self.filled > 0 && self.filled < PACKET_SIZE {
            trace!("tx: padding last packet from {} bytes", self.filled);
            self.slot[self.filled..].fill(control::SUB);
            self.filled = PACKET_SIZE;
            if self.state == TxState::Filling {
                self.send_packet(io);
            }
        } else if self.filled == 0 && self.state == TxState::Filling {
            self.send_eot(io);
        }
    }

    /// Abort the session from any active state.
    pub fn cancel<T: Transport>(&mut self, io: &mut T) {
        if !matches!(
            self.state,
            TxState::Abort | TxState::Aborted | TxState::Done
        ) {
            debug!("tx: cancelled locally");
            self.enter_abort(io);
        }
    }

    /// Drive the state machine.
    pub fn poll<T: Transport>(&mut self, io: &mut T) -> TxEvent {
        match self.state {
            TxState::WaitReceiverReady => self.poll_receiver_ready(io),
            TxState::Filling => {
                while let Some(byte) = io.read_nonblocking() {
                    if byte == control::CAN {
                        debug!("tx: cancelled by receiver");
                        self.enter_abort(io);
                        return TxEvent::Idle;
                    }
                    trace!("tx: ignoring 0x{byte:02X} while filling");
                }
                TxEvent::Idle
            },
            TxState::AwaitingAck => self.poll_ack(io),
            TxState::AwaitingEotAck => self.poll_eot_ack(io),
            TxState::Abort => {
                if drain_abort(io, &mut self.timer, self.config.quiet_period) {
                    debug!("tx: abort complete");
                    self.state = TxState::Aborted;
                    TxEvent::Aborted
                } else {
                    TxEvent::Idle
                }
            },
            TxState::Aborted => TxEvent::Aborted,
            TxState::Done => TxEvent::Done,
        }
    }

    fn poll_receiver_ready<T: Transport>(&mut self, io: &mut T) -> TxEvent {
        while let Some(byte) = io.read_nonblocking() {
            match byte {
                control::NAK => {
                    self.checksum = Checksum::Additive;
                    self.receiver_ready(io);
                    return TxEvent::Idle;
                },
                control::C => {
                    self.checksum = Checksum::Crc16;
                    self.receiver_ready(io);
                    return TxEvent::Idle;
                },
                control::CAN | control::ESC => {
                    debug!("tx: receiver refused the transfer");
                    self.enter_abort(io);
                    return TxEvent::Idle;
                },
                other => trace!("tx: ignoring 0x{other:02X} while waiting for receiver"),
            }
        }

        if self.timer.expired() {
            self.retries = self.retries.saturating_sub(1);
            if self.retries == 0 {
                warn!("tx: receiver never became ready");
                self.enter_abort(io);
            } else {
                trace!("tx: still waiting for receiver ({} tries left)", self.retries);
                self.timer.arm(self.config.ready_timeout);
            }
        }
        TxEvent::Idle
    }

    fn receiver_ready<T: Transport>(&mut self, io: &mut T) {
        debug!("tx: receiver ready, using {:?}", self.checksum);
        self.state = TxState::Filling;
        self.retries = self.config.retry_budget;
        self.timer.disarm();
        if self.filled == PACKET_SIZE {
            self.send_packet(io);
        } else if self.last_chunk && self.filled == 0 {
            self.send_eot(io);
        }
    }

    fn poll_ack<T: Transport>(&mut self, io: &mut T) -> TxEvent {
        while let Some(byte) = io.read_nonblocking() {
            match byte {
                control::ACK => {
                    trace!("tx: packet {} acknowledged", self.seq);
                    self.seq = self.seq.wrapping_add(1);
                    self.filled = 0;
                    self.packets_acked += 1;
                    self.retries = self.config.retry_budget;
                    if self.last_chunk {
                        self.send_eot(io);
                    } else {
                        self.state = TxState::Filling;
                        self.timer.disarm();
                    }
                    return TxEvent::PacketAcked;
                },
                control::NAK => {
                    debug!("tx: packet {} NAKed", self.seq);
                    self.retry(io, Self::send_packet);
                    return TxEvent::Idle;
                },
                control::CAN => {
                    debug!("tx: cancelled by receiver");
                    self.enter_abort(io);
                    return TxEvent::Idle;
                },
                other => trace!("tx: ignoring 0x{other:02X} while waiting for ACK"),
            }
        }

        if self.timer.expired() {
            debug!("tx: no response to packet {}", self.seq);
            self.retry(io, Self::send_packet);
        }
        TxEvent::Idle
    }

    fn poll_eot_ack<T: Transport>(&mut self, io: &mut T) -> TxEvent {
        while let Some(byte) = io.read_nonblocking() {
            match byte {
                control::ACK => {
                    debug!("tx: EOT acknowledged, transfer complete");
                    self.state = TxState::Done;
                    self.timer.disarm();
                    return TxEvent::Done;
                },
                control::NAK => {
                    self.retry(io, Self::send_eot);
                    return TxEvent::Idle;
                },
                control::CAN => {
                    self.enter_abort(io);
                    return TxEvent::Idle;
                },
                other => trace!("tx: ignoring 0x{other:02X} while waiting for EOT ACK"),
            }
        }

        if self.timer.expired() {
            self.retry(io, Self::send_eot);
        }
        TxEvent::Idle
    }

    /// Spend one unit of retry budget and resend, or abort when none is left.
    fn retry<T: Transport>(&mut self, io: &mut T, resend: fn(&mut Self, &mut T)) {
        self.retries = self.retries.saturating_sub(1);
        if self.retries == 0 {
            warn!("tx: retry budget exhausted at packet {}", self.seq);
            self.enter_abort(io);
        } else {
            resend(self, io);
        }
    }

    fn send_packet<T: Transport>(&mut self, io: &mut T) {
        let check_len = self.checksum.field_len();
        let mut frame = [0u8; FRAME_MAX];
        frame[0] = control::SOH;
        frame[1] = self.seq;
        frame[2] = !self.seq;
        frame[3..3 + PACKET_SIZE].copy_from_slice(&self.slot);
        self.checksum.write(
            &self.slot,
            &mut frame[3 + PACKET_SIZE..3 + PACKET_SIZE + check_len],
        );
        trace!("tx: sending packet {}", self.seq);
        io.write_all(&frame[..3 + PACKET_SIZE + check_len]);
        self.state = TxState::AwaitingAck;
        self.timer.arm(self.config.ack_timeout);
    }

    fn send_eot<T: Transport>(&mut self, io: &mut T) {
        trace!("tx: sending EOT");
        io.write(control::EOT);
        self.state = TxState::AwaitingEotAck;
        self.timer.arm(self.config.ack_timeout);
    }

    fn enter_abort<T: Transport>(&mut self, io: &mut T) {
        io.write_all(&[control::CAN, control::CAN]);
        self.state = TxState::Abort;
        self.timer.arm(self.config.quiet_period);
    }
}
