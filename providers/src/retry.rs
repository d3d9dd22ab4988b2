//! Retry bounds and backoff arithmetic.
//!
//! The adapters in this crate never retry; the flow dispatcher owns the retry
//! loop and calls into this module for the delay shape. Defaults match the
//! official SDK policy:
//!
//! - Max retries: 2 (3 total attempts)
//! - Initial delay: 500ms, doubling per retry
//! - Max delay: 8 seconds
//! - Jitter: down-jitter up to 25% (multiplier in [0.75, 1.0])

use std::time::Duration;

/// Retry configuration applied to transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the initial request).
    pub max_retries: u32,
    /// Backoff delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Jitter factor for down-jitter (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

/// Calculates the delay before a retry.
///
/// `backoff_step` is 0 before the first retry, 1 before the second, and so
/// on: `initial_delay * 2^backoff_step`, capped at `max_delay`, then
/// down-jittered.
#[must_use]
pub fn backoff_delay(backoff_step: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(backoff_step as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Down-jitter: multiply by a random factor in [1 - jitter_factor, 1.0].
    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}
