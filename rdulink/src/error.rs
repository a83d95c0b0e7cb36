//! Error types for rdulink.

use std::io;
use thiserror::Error;

use crate::protocol::record::RecordError;

/// Result type for rdulink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rdulink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application asked the current operation to stop.
    #[error("Interrupted")]
    Interrupted,

    /// The transfer session ended in an abort (cancel or retry exhaustion).
    #[error("Transfer aborted: {0}")]
    Aborted(String),

    /// A previous session aborted and the link has not been reset.
    #[error("Link must be reset before starting a new session")]
    SessionNotReset,

    /// A record line could not be decoded.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
