//! Backoff between retry attempts
//!
//! `delay(n) = min(2^n ms + uniform(0, 1000) ms, 5000 ms)`

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive jitter, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Upper bound of the uniform jitter term
    pub max_jitter: Duration,
    /// Hard cap on any returned delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the delay for a given attempt: `2^attempt` milliseconds.
    ///
    /// Attempt 0 is treated as 1. Saturates instead of overflowing.
    pub fn base(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1);
        let millis = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        Duration::from_millis(millis)
    }

    /// Delay before the next attempt, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.with_jitter(attempt, Duration::from_millis(jitter))
    }

    /// Delay for an explicit jitter value (clamped to `max_jitter`).
    pub fn with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let jitter = jitter.min(self.max_jitter);
        self.base(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=40u32 {
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                let base = policy.base(attempt);
                assert!(delay <= Duration::from_millis(5000), "attempt {attempt}: {delay:?}");
                if base < Duration::from_millis(4000) {
                    assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
                    assert!(delay <= base + Duration::from_millis(1000));
                }
            }
        }
    }

    #[test]
    fn test_base_is_exponential() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base(1), Duration::from_millis(2));
        assert_eq!(policy.base(2), Duration::from_millis(4));
        assert_eq!(policy.base(10), Duration::from_millis(1024));
        // attempt 0 behaves like 1
        assert_eq!(policy.base(0), Duration::from_millis(2));
    }

    #[test]
    fn test_large_attempts_saturate_to_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base(64), Duration::from_millis(u64::MAX));
        assert_eq!(policy.with_jitter(64, Duration::ZERO), Duration::from_millis(5000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_explicit_jitter_is_clamped() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.with_jitter(3, Duration::from_secs(60)),
            Duration::from_millis(8 + 1000)
        );
    }
}
