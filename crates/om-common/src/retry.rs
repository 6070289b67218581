//! Retry policy for optimistic-concurrency contention.
//!
//! An explicit policy object instead of bare sleep loops: bounded attempts,
//! a jittered backoff interval, and a retryable-condition predicate, all
//! testable independent of the transport.

use std::time::Duration;

use rand::Rng;

use crate::error::OmError;

/// Bounded retry with randomized jitter.
///
/// The default matches the reference behavior for automation-config writes:
/// three attempts total, sleeping between one and five seconds between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Minimum delay between attempts.
    pub base_delay: Duration,
    /// Additional random delay in `0..=jitter` added to every sleep.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::contention()
    }
}

impl RetryPolicy {
    /// Policy for automation-config write contention.
    pub fn contention() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(4),
        }
    }

    /// Policy with no delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// True if `error` may be retried and `attempts_made` leaves budget for
    /// another attempt.
    pub fn should_retry(&self, error: &OmError, attempts_made: u32) -> bool {
        error.is_contention() && attempts_made < self.max_attempts
    }

    /// The jittered delay to sleep before the next attempt.
    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base_delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.base_delay + Duration::from_millis(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_only_contention() {
        let policy = RetryPolicy::contention();
        let contention = OmError::contention("/groups/g/automationConfig", "conflict");
        let fatal = OmError::remote("PUT", "/groups/g/automationConfig", 500, "boom");

        assert!(policy.should_retry(&contention, 1));
        assert!(policy.should_retry(&contention, 2));
        assert!(!policy.should_retry(&contention, 3));
        assert!(!policy.should_retry(&fatal, 1));
    }

    #[test]
    fn test_delay_within_bounds() {
        let policy = RetryPolicy::contention();
        for _ in 0..100 {
            let d = policy.delay();
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay(), Duration::ZERO);
    }
}
