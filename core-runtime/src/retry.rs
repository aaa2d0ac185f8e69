//! Backoff policy shared by provider connection and service binding.

use std::time::Duration;

/// Exponential backoff with a cap.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, clamped to
/// `max_delay`. With `max_attempts: None` the caller keeps retrying until it
/// succeeds or is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// When `false` every retry waits `base_delay`.
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up after `max_attempts`.
    pub fn bounded(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay,
            max_delay,
            use_exponential_backoff: true,
        }
    }

    /// Policy that retries forever.
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
            use_exponential_backoff: true,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(60), Duration::from_secs(1));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            use_exponential_backoff: false,
            ..RetryPolicy::unbounded(Duration::from_millis(50), Duration::from_secs(1))
        };
        assert_eq!(policy.delay_for(7), Duration::from_millis(50));
    }

    #[test]
    fn test_bounded_attempts() {
        let policy = RetryPolicy::bounded(3, Duration::from_millis(10), Duration::from_millis(40));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        assert!(RetryPolicy::default().allows_retry(u32::MAX - 1));
    }
}
