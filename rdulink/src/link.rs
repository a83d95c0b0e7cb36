//! Transfer sessions over one transport.
//!
//! A [`Link`] owns the transport. Sessions borrow the link mutably, so only
//! one receive or transmit session can exist at a time. A session that ends
//! in an abort leaves the link flagged; the next session cannot start until
//! [`Link::reset`] is called.

use log::debug;

use crate::error::{Error, Result};
use crate::memory::AccessMode;
use crate::protocol::crc::Checksum;
use crate::protocol::xmodem::{
    Receiver, RxEvent, RxState, Sender, TxEvent, TxState, TxStatus, XmodemConfig,
};
use crate::transport::Transport;

/// Transport plus session bookkeeping.
#[derive(Debug)]
pub struct Link<T> {
    transport: T,
    config: XmodemConfig,
    needs_reset: bool,
}

impl<T: Transport> Link<T> {
    /// Wrap `transport` with the given Xmodem settings.
    pub fn new(transport: T, config: XmodemConfig) -> Self {
        Self {
            transport,
            config,
            needs_reset: false,
        }
    }

    /// Xmodem settings used for new sessions.
    pub fn config(&self) -> &XmodemConfig {
        &self.config
    }

    /// Shared access to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Exclusive access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Whether an aborted session must be cleared before the next one.
    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    /// Clear the aborted-session flag.
    pub fn reset(&mut self) {
        if self.needs_reset {
            debug!("link: reset after abort");
        }
        self.needs_reset = false;
    }

    fn check_ready(&self) -> Result<()> {
        if self.needs_reset {
            return Err(Error::SessionNotReset);
        }
        if !self.transport.supports_session() {
            return Err(Error::Protocol(
                "peer does not support transfer sessions".into(),
            ));
        }
        Ok(())
    }

    /// Start receiving; `mode` and `offset` are carried for the download
    /// that consumes the payloads.
    pub fn begin_receive(
        &mut self,
        mode: AccessMode,
        offset: u16,
    ) -> Result<ReceiveSession<'_, T>> {
        self.check_ready()?;
        debug!("link: receive session ({mode:?}, offset 0x{offset:04X})");
        let receiver = Receiver::new(self.config.clone());
        Ok(ReceiveSession {
            link: self,
            receiver,
            mode,
            offset,
        })
    }

    /// Start transmitting.
    pub fn begin_transmit(&mut self) -> Result<TransmitSession<'_, T>> {
        self.check_ready()?;
        debug!("link: transmit session");
        let sender = Sender::new(self.config.clone());
        Ok(TransmitSession { link: self, sender })
    }
}

/// An active receive session.
pub struct ReceiveSession<'l, T> {
    link: &'l mut Link<T>,
    receiver: Receiver,
    mode: AccessMode,
    offset: u16,
}

impl<T: Transport> ReceiveSession<'_, T> {
    /// Drive the receiver.
    pub fn poll(&mut self) -> RxEvent<'_> {
        self.receiver.poll(&mut self.link.transport)
    }

    /// Acknowledge the payload returned by the last `DataReady`.
    pub fn acknowledge(&mut self) {
        self.receiver.acknowledge(&mut self.link.transport);
    }

    /// Advance session timers.
    pub fn tick(&mut self, ticks: u32) {
        self.receiver.tick(ticks);
    }

    /// Abort the session.
    pub fn cancel(&mut self) {
        self.receiver.cancel(&mut self.link.transport);
    }

    /// Store or verify.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Relocation offset requested for this session.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Receiver state.
    pub fn state(&self) -> RxState {
        self.receiver.state()
    }

    /// Check algorithm in use.
    pub fn checksum(&self) -> Checksum {
        self.receiver.checksum()
    }

    /// Whether the receiver saw a transport overrun during this session.
    pub fn overrun(&self) -> bool {
        self.receiver.overrun()
    }

    /// Whether the session reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.receiver.is_finished()
    }

    /// The transport, e.g. for loopback plumbing.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.link.transport
    }
}

impl<T> Drop for ReceiveSession<'_, T> {
    fn drop(&mut self) {
        if matches!(self.receiver.state(), RxState::Abort | RxState::Aborted) {
            self.link.needs_reset = true;
        }
    }
}

/// An active transmit session.
pub struct TransmitSession<'l, T> {
    link: &'l mut Link<T>,
    sender: Sender,
}

impl<T: Transport> TransmitSession<'_, T> {
    /// Offer one byte for transmission.
    pub fn feed_byte(&mut self, byte: u8) -> TxStatus {
        self.sender.feed_byte(&mut self.link.transport, byte)
    }

    /// Mark the end of the data.
    pub fn finish(&mut self) {
        self.sender.finish(&mut self.link.transport);
    }

    /// Drive the sender.
    pub fn poll(&mut self) -> TxEvent {
        self.sender.poll(&mut self.link.transport)
    }

    /// Advance session timers.
    pub fn tick(&mut self, ticks: u32) {
        self.sender.tick(ticks);
    }

    /// Abort the session.
    pub fn cancel(&mut self) {
        self.sender.cancel(&mut self.link.transport);
    }

    /// Sender state.
    pub fn state(&self) -> TxState {
        self.sender.state()
    }

    /// Packets acknowledged so far.
    pub fn packets_acked(&self) -> usize {
        self.sender.packets_acked()
    }

    /// Whether the session reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.sender.is_finished()
    }

    /// The transport, e.g. for loopback plumbing.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.link.transport
    }
}

impl<T> Drop for TransmitSession<'_, T> {
    fn drop(&mut self) {
        if matches!(self.sender.state(), TxState::Abort | TxState::Aborted) {
            self.link.needs_reset = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xmodem::control;
    use crate::transport::QueueTransport;

    fn quick() -> XmodemConfig {
        XmodemConfig {
            start_timeout: 10,
            char_timeout: 5,
            ack_timeout: 10,
            ready_timeout: 10,
            crc_attempts: 1,
            retry_budget: 2,
            quiet_period: 3,
        }
    }

    struct Unsupported;

    impl Transport for Unsupported {
        fn read_nonblocking(&mut self) -> Option<u8> {
            None
        }

        fn has_byte(&self) -> bool {
            false
        }

        fn write(&mut self, _byte: u8) {}

        fn supports_session(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_clean_session_leaves_link_ready() {
        let mut link = Link::new(QueueTransport::new(), quick());
        {
            let mut session = link.begin_receive(AccessMode::Verify, 0x10).unwrap();
            assert_eq!(session.mode(), AccessMode::Verify);
            assert_eq!(session.offset(), 0x10);
            assert_eq!(session.poll(), RxEvent::Idle);
            session.transport_mut().inject(&[control::EOT]);
            assert_eq!(session.poll(), RxEvent::Done);
        }
        assert!(!link.needs_reset());
        assert!(link.begin_transmit().is_ok());
    }

    #[test]
    fn test_cancelled_session_requires_reset() {
        let mut link = Link::new(QueueTransport::new(), quick());
        {
            let mut session = link.begin_transmit().unwrap();
            session.cancel();
            assert_eq!(session.state(), TxState::Abort);
            session.tick(3);
            assert_eq!(session.poll(), TxEvent::Aborted);
        }
        assert!(link.needs_reset());
        assert!(matches!(
            link.begin_receive(AccessMode::Store, 0),
            Err(Error::SessionNotReset)
        ));
        link.reset();
        assert!(link.begin_receive(AccessMode::Store, 0).is_ok());
    }

    #[test]
    fn test_dropping_mid_abort_still_flags_link() {
        let mut link = Link::new(QueueTransport::new(), quick());
        link.begin_receive(AccessMode::Store, 0).unwrap().cancel();
        assert!(link.needs_reset());
        assert_eq!(link.transport_mut().take_written(), vec![control::CAN]);
    }

    #[test]
    fn test_unsupported_peer_is_rejected() {
        let mut link = Link::new(Unsupported, quick());
        assert!(matches!(link.begin_transmit(), Err(Error::Protocol(_))));
    }
}
