//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before the retry that follows attempt `attempt_index` (0-based):
/// `base_ms * 2^attempt_index`, capped at `max_ms`.
pub fn backoff_delay(attempt_index: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt_index);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// [`backoff_delay`] plus up to 10% random jitter when `jitter` is set.
pub fn calculate_backoff(attempt_index: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    let delay = backoff_delay(attempt_index, base_ms, max_ms);
    if !jitter {
        return delay;
    }

    let jitter_range = delay.as_millis() as u64 / 10;
    let extra = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    delay + Duration::from_millis(extra)
}
