//! Exponential retry-delay policy for fallible upstream steps.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Hard ceiling on the retry delay regardless of how many retries accrued.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(600_000);

/// Stateful exponential backoff: the first delay equals the configured base,
/// each further call without a reset doubles it, capped at
/// [`MAX_RETRY_DELAY`]. No jitter; callers reset on the first success so a
/// past incident never inflates delays for unrelated failures.
#[derive(Debug)]
pub struct RetryDelayProvider {
    base_delay: Duration,
    retries: AtomicU32,
}

impl RetryDelayProvider {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            retries: AtomicU32::new(0),
        }
    }

    /// Returns the delay to sleep before the next attempt and advances the
    /// retry counter as a side effect.
    pub fn next_delay(&self) -> Duration {
        let retries = self.retries.fetch_add(1, Ordering::Relaxed);
        // Clamp the exponent so the shift stays defined; the ceiling below
        // makes anything past 2^63 equivalent anyway.
        let exponent = retries.min(63);
        let mut delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        let max_ms = MAX_RETRY_DELAY.as_millis() as u64;
        if delay_ms > max_ms {
            delay_ms = max_ms;
        }
        Duration::from_millis(delay_ms)
    }

    /// Zeroes the retry counter so the next delay starts from the base again.
    pub fn reset(&self) {
        self.retries.store(0, Ordering::Relaxed);
    }
}
