//! Job-level retry policy.
//!
//! Only the scheduler retries. A transient failure puts the whole job back
//! on the queue after a backoff delay; the job then resumes from its last
//! committed page.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};

/// Default delay before the first retry.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Default upper bound on a single delay.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Default number of retries after the first attempt.
pub const MAX_RETRIES: usize = 3;

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Minimum delay between retries.
    pub min_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: INITIAL_BACKOFF_MS,
            max_delay_ms: MAX_BACKOFF_MS,
            max_retries: MAX_RETRIES,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay_ms: min_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            max_retries,
            jitter: true,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this policy.
    #[must_use]
    pub fn into_backoff(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries);

        if self.jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    /// Delay before retry number `retry` (0-based), or `None` once the
    /// retries are exhausted.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        self.into_backoff().build().nth(retry as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.min_delay_ms, INITIAL_BACKOFF_MS);
        assert_eq!(policy.max_delay_ms, MAX_BACKOFF_MS);
        assert_eq!(policy.max_retries, MAX_RETRIES);
        assert!(policy.jitter);
    }

    #[test]
    fn test_delays_grow_and_are_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(300), 4)
            .with_jitter(false);

        let delays: Vec<_> = (0..4).map(|n| policy.delay_for(n).unwrap()).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(300));
        assert_eq!(delays[3], Duration::from_millis(300));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1), 3);
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
        assert!(RetryPolicy::none().delay_for(0).is_none());
    }
}
