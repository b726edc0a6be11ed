use std::time::Duration;

use crate::error::Recoverable;

/// Bounded retry with exponential backoff, shared by the scrape manager and
/// the LLM router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_cap,
        }
    }

    /// Policy that never retries.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the next attempt once `attempts_made` attempts have failed:
    /// `backoff_base * 2^attempts_made`, capped at `backoff_cap`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts_made.min(31));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    pub fn should_retry<F: Recoverable>(&self, failure: &F, attempts_made: u32) -> bool {
        failure.is_transient() && attempts_made < self.max_attempts
    }
}
