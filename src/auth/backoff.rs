//! Retry bounds for session refresh.

use std::time::Duration;

/// Default upper bound on refresh attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded exponential backoff used by the refresh coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Upper bound on total attempts, including the initial request.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per further failure.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// True when another attempt may follow failed attempt `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let pow = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(pow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_one_second() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn retries_stop_at_max_attempts() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));

        let single = BackoffPolicy {
            max_attempts: 0,
            ..BackoffPolicy::default()
        };
        assert!(!single.allows_retry_after(1));
    }
}
