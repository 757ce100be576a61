//! Bounded retry policy.

use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed,
    /// Delay doubles per attempt: `base * 2^attempt`.
    Exponential,
}

/// An explicit, bounded retry policy.
///
/// Shared by the two places that retry at all: archive-index pagination and
/// store writes. Page fetch and extraction failures are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy for store writes: 3 attempts, fixed 5s between them.
    pub fn store_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }

    /// Policy for archive pagination: 5 attempts, 1s doubling per attempt.
    pub fn archive_default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
        }
    }

    /// Delay to sleep after the given zero-based failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self.base_delay.saturating_mul(1u32 << attempt.min(16)),
        }
    }

    /// Whether another attempt remains after the given zero-based attempt.
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::store_default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(5));
    }

    #[test]
    fn exponential_delay_doubles() {
        let policy = RetryPolicy::archive_default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::store_default();
        assert!(policy.has_next(0));
        assert!(policy.has_next(1));
        assert!(!policy.has_next(2));
    }
}
