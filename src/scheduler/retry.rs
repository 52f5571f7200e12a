use crate::scheduler::types::TaskFailure;
use std::time::Duration;

/// Classifies failures and computes exponential backoff delays.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay_seconds: u64) -> Self {
        Self {
            base_delay: Duration::from_secs(base_delay_seconds),
        }
    }

    /// Permanent error classes are never retried regardless of
    /// remaining attempts; everything else is fair game.
    pub fn is_retryable(&self, failure: &TaskFailure) -> bool {
        !failure.kind.is_permanent()
    }

    pub fn should_retry(&self, failure: &TaskFailure, retry_count: u32, max_retries: u32) -> bool {
        self.is_retryable(failure) && retry_count < max_retries
    }

    /// `base * 2^retry_count`, computed from the attempt count before
    /// the increment: 60s, 120s, 240s for the defaults.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(retry_count.min(32));
        Duration::from_secs(self.base_delay.as_secs().saturating_mul(multiplier))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(60)
    }
}
