//! Exponential-backoff delays for job socket reconnects.
//!
//! The delay for attempt `n` is `base_delay * 2^n`, clamped to
//! `max_delay`. No jitter is applied.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Upper bound on the delay between attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait before reconnect attempt number `attempt` (0-based).
    ///
    /// Saturates instead of overflowing for very large attempt counts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
