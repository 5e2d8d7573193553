//! Exponential backoff with jitter between failover attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay before the attempt with zero-based index `attempt`.
///
/// The first attempt never waits. Later ones wait `base * 2^(n-1)`,
/// capped at `max`, plus up to 10% jitter.
pub fn delay_before(attempt: usize, config: &BackoffConfig) -> Duration {
    if attempt == 0 || config.base_delay_ms == 0 {
        return Duration::ZERO;
    }

    let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
    let capped = config
        .base_delay_ms
        .saturating_mul(1u64 << shift)
        .min(config.max_delay_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
