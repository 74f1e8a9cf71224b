//! Cancellable polling delay used between worker steps.

use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Sleeps in `check_interval` slices until `condition` returns true or
/// `max_wait` elapses, whichever comes first. The condition is evaluated
/// before the first slice, and the final slice is clamped to the remaining
/// budget so the total never overshoots `max_wait`.
pub async fn wait_for_with_interval<F>(condition: F, max_wait: Duration, check_interval: Duration)
where
    F: Fn() -> bool,
{
    let mut waited = Duration::ZERO;
    while waited < max_wait && !condition() {
        let step = if check_interval.is_zero() {
            max_wait - waited
        } else {
            check_interval.min(max_wait - waited)
        };
        sleep(step).await;
        waited += step;
    }
}

/// [`wait_for_with_interval`] with the default 30s budget and 5s interval.
pub async fn wait_for<F>(condition: F)
where
    F: Fn() -> bool,
{
    wait_for_with_interval(condition, DEFAULT_MAX_WAIT, DEFAULT_CHECK_INTERVAL).await;
}
