//! Receive state machine.

use log::{debug, trace, warn};

use super::{PACKET_SIZE, XmodemConfig, control, drain_abort};
use crate::protocol::crc::Checksum;
use crate::timer::Countdown;
use crate::transport::Transport;

/// Receiver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Waiting for SOH (or EOT); requests a restart on each timeout.
    WaitStart,
    /// Collecting the body of a packet.
    ReceivingData,
    /// A validated payload is waiting for the caller.
    PacketReady,
    /// Cancelling: waiting for the line to go quiet.
    Abort,
    /// Abort complete (terminal).
    Aborted,
    /// Sender finished with EOT (terminal).
    Done,
}

/// Result of one [`Receiver::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum RxEvent<'a> {
    /// Nothing for the caller yet.
    Idle,
    /// A new payload is available; call `acknowledge` once consumed.
    DataReady(&'a [u8; PACKET_SIZE]),
    /// A duplicate of the previous packet was acknowledged again.
    PacketAcked,
    /// Sequence lost; the session is aborting.
    Error,
    /// The session aborted.
    Aborted,
    /// The sender ended the transfer.
    Done,
}

/// Xmodem receiver.
#[derive(Debug, Clone)]
pub struct Receiver {
    config: XmodemConfig,
    state: RxState,
    checksum: Checksum,
    mode_locked: bool,
    crc_attempts: u8,
    retries: u8,
    expected: u8,
    header: [u8; 2],
    data: [u8; PACKET_SIZE],
    check: [u8; 2],
    filled: usize,
    overrun: bool,
    timer: Countdown,
}

impl Receiver {
    /// Create a receiver; the first `poll` sends the opening request.
    pub fn new(config: XmodemConfig) -> Self {
        let mut timer = Countdown::new();
        timer.arm(0);
        Self {
            crc_attempts: config.crc_attempts,
            retries: config.retry_budget,
            config,
            state: RxState::WaitStart,
            checksum: Checksum::Crc16,
            mode_locked: false,
            expected: 1,
            header: [0; 2],
            data: [0; PACKET_SIZE],
            check: [0; 2],
            filled: 0,
            overrun: false,
            timer,
        }
    }

    /// Current state.
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Check algorithm in use (final once the first packet has started).
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Sequence number of the next new packet.
    pub fn expected_sequence(&self) -> u8 {
        self.expected
    }

    /// Whether a transport overrun was seen while a packet was arriving.
    ///
    /// The transport's own flag is left set for the caller to take.
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// Whether the session has ended (done or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self.state, RxState::Done | RxState::Aborted)
    }

    /// Advance the activity timer.
    pub fn tick(&mut self, ticks: u32) {
        self.timer.tick(ticks);
    }

    /// Abort the session from any active state.
    pub fn cancel<T: Transport>(&mut self, io: &mut T) {
        if !matches!(
            self.state,
            RxState::Abort | RxState::Aborted | RxState::Done
        ) {
            debug!("rx: cancelled locally");
            self.enter_abort(io);
        }
    }

    /// Drive the state machine.
    pub fn poll<T: Transport>(&mut self, io: &mut T) -> RxEvent<'_> {
        match self.state {
            RxState::WaitStart => self.poll_wait_start(io),
            RxState::ReceivingData => self.poll_receiving(io),
            RxState::PacketReady => RxEvent::DataReady(&self.data),
            RxState::Abort => {
                if drain_abort(io, &mut self.timer, self.config.quiet_period) {
                    debug!("rx: abort complete");
                    self.state = RxState::Aborted;
                    RxEvent::Aborted
                } else {
                    RxEvent::Idle
                }
            },
            RxState::Aborted => RxEvent::Aborted,
            RxState::Done => RxEvent::Done,
        }
    }

    /// Release the current payload: ACK it and wait for the next packet.
    pub fn acknowledge<T: Transport>(&mut self, io: &mut T) {
        if self.state != RxState::PacketReady {
            trace!("rx: acknowledge ignored in {:?}", self.state);
            return;
        }
        io.write(control::ACK);
        trace!("rx: packet {} acknowledged", self.expected);
        self.expected = self.expected.wrapping_add(1);
        self.retries = self.config.retry_budget;
        self.state = RxState::WaitStart;
        self.timer.arm(self.config.start_timeout);
    }

    fn poll_wait_start<T: Transport>(&mut self, io: &mut T) -> RxEvent<'_> {
        while let Some(byte) = io.read_nonblocking() {
            match byte {
                control::SOH => {
                    if !self.mode_locked {
                        debug!("rx: sender started, using {:?}", self.checksum);
                        self.mode_locked = true;
                    }
                    self.state = RxState::ReceivingData;
                    self.filled = 0;
                    self.timer.arm(self.config.char_timeout);
                    return self.poll_receiving(io);
                },
                control::EOT => {
                    debug!("rx: EOT received, transfer complete");
                    io.write(control::ACK);
                    self.state = RxState::Done;
                    self.timer.disarm();
                    return RxEvent::Done;
                },
                control::CAN => {
                    debug!("rx: cancelled by sender");
                    self.enter_abort(io);
                    return RxEvent::Idle;
                },
                other => trace!("rx: ignoring 0x{other:02X} while waiting for start"),
            }
        }

        if self.timer.expired() {
            self.request_restart(io);
        }
        RxEvent::Idle
    }

    fn poll_receiving<T: Transport>(&mut self, io: &mut T) -> RxEvent<'_> {
        if !self.overrun && io.overrun() {
            warn!("rx: receive overrun during packet");
            self.overrun = true;
        }

        let frame_len = 2 + PACKET_SIZE + self.checksum.field_len();
        while self.filled < frame_len {
            let Some(byte) = io.read_nonblocking() else {
                if self.timer.expired() {
                    debug!(
                        "rx: packet timed out after {}/{} bytes",
                        self.filled, frame_len
                    );
                    self.state = RxState::WaitStart;
                    self.request_restart(io);
                }
                return RxEvent::Idle;
            };
            self.store(byte);
            self.timer.arm(self.config.char_timeout);
        }

        self.complete_packet(io)
    }

    fn store(&mut self, byte: u8) {
        match self.filled {
            0 | 1 => self.header[self.filled] = byte,
            n if n < 2 + PACKET_SIZE => self.data[n - 2] = byte,
            n => self.check[n - 2 - PACKET_SIZE] = byte,
        }
        self.filled += 1;
    }

    fn complete_packet<T: Transport>(&mut self, io: &mut T) -> RxEvent<'_> {
        let [seq, complement] = self.header;

        if seq ^ complement != 0xFF {
            warn!("rx: bad sequence pair {seq:02X}/{complement:02X}, discarding");
            self.restart_after_fault();
            return RxEvent::Idle;
        }

        if seq == self.expected.wrapping_sub(1) {
            debug!("rx: duplicate packet {seq}, re-acknowledging");
            io.write(control::ACK);
            self.state = RxState::WaitStart;
            self.timer.arm(self.config.start_timeout);
            return RxEvent::PacketAcked;
        }

        if seq != self.expected {
            warn!(
                "rx: sequence lost (got {seq}, expected {})",
                self.expected
            );
            self.enter_abort(io);
            return RxEvent::Error;
        }

        let check_len = self.checksum.field_len();
        if !self
            .checksum
            .matches(&self.data, &self.check[..check_len])
        {
            debug!("rx: check mismatch on packet {seq}, waiting for resend");
            self.restart_after_fault();
            return RxEvent::Idle;
        }

        trace!("rx: packet {seq} ready");
        self.state = RxState::PacketReady;
        self.timer.disarm();
        RxEvent::DataReady(&self.data)
    }

    /// Discard the packet and let the next start timeout NAK it.
    fn restart_after_fault(&mut self) {
        self.state = RxState::WaitStart;
        self.timer.arm(self.config.start_timeout);
    }

    fn request_restart<T: Transport>(&mut self, io: &mut T) {
        if !self.mode_locked && self.crc_attempts > 0 {
            self.crc_attempts -= 1;
            self.checksum = Checksum::Crc16;
            trace!("rx: requesting CRC mode");
            io.write(control::C);
            self.timer.arm(self.config.start_timeout);
        } else if self.retries > 0 {
            self.retries -= 1;
            if !self.mode_locked {
                self.checksum = Checksum::Additive;
            }
            trace!("rx: NAK ({} retries left)", self.retries);
            io.write(control::NAK);
            self.timer.arm(self.config.start_timeout);
        } else {
            warn!("rx: retry budget exhausted");
            self.enter_abort(io);
        }
    }

    fn enter_abort<T: Transport>(&mut self, io: &mut T) {
        io.write(control::CAN);
        self.state = RxState::Abort;
        self.timer.arm(self.config.quiet_period);
    }
}
