//! # Exponential Backoff
//!
//! Per-object retry delays for failed reconciles. The delay starts at the
//! minimum, doubles after every consecutive failure and is capped at the
//! maximum. A successful reconcile discards the calculator, so the next
//! failure starts again from the minimum.
//!
//! Default sequence: 5s, 10s, 20s, 40s, 80s, 160s, 300s (max).

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Backoff returned by the next call
    current_seconds: u64,
    /// Maximum backoff in seconds
    max_seconds: u64,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given bounds in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        self.current_seconds = self.current_seconds.saturating_mul(2).min(self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(5, 300)
    }
}
