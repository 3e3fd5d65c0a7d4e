//! Exponential backoff policy for stream reconnects.

use std::time::Duration;

/// Default number of consecutive failed reconnects before a connection gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Exponential backoff policy.
///
/// Delays double from `base_delay` on every attempt, capped at `max_delay`.
/// After `max_attempts` consecutive failures no further attempt is made.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    /// Create a policy with the default delay curve and the given attempt cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait before the retry following `n_past_attempts` failures.
    pub fn delay(&self, n_past_attempts: u32) -> Duration {
        1u32.checked_shl(n_past_attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another attempt may be scheduled after `n_past_attempts` retries.
    pub fn should_retry(&self, n_past_attempts: u32) -> bool {
        n_past_attempts < self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}
