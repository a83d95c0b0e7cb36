//! Externally ticked countdown timers.
//!
//! Protocol timing is decoupled from CPU speed: a periodic source (1 tick ≈
//! 1 ms) calls [`Countdown::tick`], and the state machines only ever check
//! [`Countdown::expired`]. Nothing here sleeps.

use std::time::Instant;

/// Saturating software countdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    armed: bool,
}

impl Countdown {
    /// Create a disarmed countdown.
    pub const fn new() -> Self {
        Self {
            remaining: 0,
            armed: false,
        }
    }

    /// Start counting down from `ticks`.
    pub fn arm(&mut self, ticks: u32) {
        self.remaining = ticks;
        self.armed = true;
    }

    /// Stop the countdown; a disarmed countdown never expires.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.remaining = 0;
    }

    /// Advance by `ticks`, saturating at zero.
    pub fn tick(&mut self, ticks: u32) {
        self.remaining = self.remaining.saturating_sub(ticks);
    }

    /// Whether an armed countdown has reached zero.
    pub fn expired(&self) -> bool {
        self.armed && self.remaining == 0
    }

    /// Ticks left before expiry.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Whether the countdown is armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Converts wall-clock time into whole 1 ms ticks for host-side drivers.
#[derive(Debug, Clone)]
pub struct Ticker {
    last: Instant,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    /// Start measuring from now.
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Whole milliseconds elapsed since the previous call.
    ///
    /// Sub-millisecond remainders carry over to the next call.
    pub fn elapsed_ticks(&mut self) -> u32 {
        let elapsed = self.last.elapsed();
        let ticks = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
        if ticks > 0 {
            self.last += std::time::Duration::from_millis(u64::from(ticks));
        }
        ticks
    }
}
