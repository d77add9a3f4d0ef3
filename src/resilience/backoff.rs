//! Exponential backoff schedule.
//!
//! Pure delay computation; the retry loops live with their callers.

use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
///
/// Deterministic and monotonically non-decreasing in `attempt`.
pub fn exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let cap_ms = max.as_millis().min(u64::MAX as u128) as u64;
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        exponential_backoff(attempt, self.base_delay, self.max_delay)
    }

    /// The first `n` delays of the schedule.
    pub fn schedule(&self, n: u32) -> impl Iterator<Item = Duration> + '_ {
        (0..n).map(move |i| self.delay(i))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_secs(30))
    }
}
