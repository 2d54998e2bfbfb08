//! Reconnect backoff for the broker session.
//!
//! Delays grow exponentially from the configured initial value and are
//! capped, so reconnection continues indefinitely with a bounded wait.

use std::time::Duration;

use crate::protocol_constants::RECONNECT_BACKOFF_FACTOR;

/// Exponential backoff with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            attempt: 0,
        }
    }

    /// Creates a backoff from millisecond bounds.
    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// Returns the delay before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt = self.attempt.saturating_add(1);
        self.current = self
            .current
            .saturating_mul(RECONNECT_BACKOFF_FACTOR)
            .min(self.max);
        delay
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restarts the schedule after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}
