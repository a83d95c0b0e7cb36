//! Protocol implementations.
//!
//! - [`crc`]: CRC-16/XMODEM and the 8-bit additive sum
//! - [`xmodem`]: link-layer packet engine (receive and transmit)
//! - [`record`]: S-record / Intel Hex codec and line capture

pub mod crc;
pub mod record;
pub mod xmodem;
