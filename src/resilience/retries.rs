//! Retry policy.
//!
//! # Responsibilities
//! - Bound the number of attempts for one logical fetch
//! - Decide whether a failed attempt is followed by another
//! - Compute the wait before the next attempt
//!
//! # Design Decisions
//! - Connection errors, timeouts and 5xx are transient; 4xx are not
//! - Method is not considered: callers opt into retries per call

use std::time::Duration;

use crate::config::FetchConfig;
use crate::resilience::backoff::calculate_backoff;

/// Retry budget and backoff parameters for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            retries: config.retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, attempt: u32, retryable: bool) -> bool {
        retryable && attempt < self.max_attempts()
    }

    /// Wait after attempt number `attempt` (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt.saturating_sub(1),
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter,
        )
    }
}

/// Status codes worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}
