//! # rdulink
//!
//! Transfer engine for RDU hand-controller memory downloads and uploads.
//!
//! This crate provides the protocol core that moves memory images between a
//! host and the hand controller over a byte-oriented serial link:
//!
//! - Xmodem-style link protocol (receive and transmit state machines)
//! - Motorola S-record and Intel Hex record codec
//! - Memory target with write/verify fault tracking
//! - Embedded command channel carried inside comment records
//! - CRC16-XMODEM and 8-bit additive checksums
//!
//! Every state machine is polled and driven by an external tick source
//! (1 tick ≈ 1 ms), so nothing in the link layer blocks. The only blocking
//! primitive is the line reader used by line-mode record capture.
//!
//! ## Features
//!
//! - `native` (default): serial port transport via the `serialport` crate
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust
//! use rdulink::{DownloadConfig, Downloader, LineStatus, MemoryTarget};
//!
//! let mut memory = MemoryTarget::ram(0x0000, 0x100);
//! let mut downloader = Downloader::new(&mut memory, DownloadConfig::default());
//!
//! assert!(matches!(
//!     downloader.decode_line("S10500200102D7"),
//!     LineStatus::Applied { address: 0x20, len: 2 }
//! ));
//! assert_eq!(downloader.decode_line("S9030000FC"), LineStatus::Terminated);
//! assert_eq!(memory.read(0x21), Some(0x02));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod command;
pub mod download;
pub mod error;
pub mod link;
pub mod memory;
pub mod port;
pub mod protocol;
pub mod timer;
pub mod transport;
pub mod upload;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{SerialTransport, list_ports};
pub use {
    command::{CommandBuffer, CommandChannel, CommandEvent, CommandExecutor},
    download::{DownloadConfig, DownloadSummary, Downloader, LineStatus},
    error::{Error, Result},
    link::{Link, ReceiveSession, TransmitSession},
    memory::{AccessMode, ByteStore, FaultFlags, FaultQuery, FaultStatus, MemoryTarget, RamStore},
    protocol::{
        crc::{Checksum, checksum8, crc16_xmodem},
        record::{
            EncodeRange, IntelHex, LineAssembler, LineReader, Record, RecordEncoder,
            RecordError, RecordFormat, RecordKind, SRecord, format_for,
        },
        xmodem::{Receiver, RxEvent, RxState, Sender, TxEvent, TxState, TxStatus, XmodemConfig},
    },
    timer::{Countdown, Ticker},
    transport::{QueueTransport, RxQueue, Transport},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
