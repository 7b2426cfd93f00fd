//! Suspension penalty between password attempts.

use std::time::Duration;

/// Exponential delay schedule enforced after each wrong password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first wrong password.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to enforce after `failures` consecutive wrong passwords.
    ///
    /// Doubles with every failure and saturates at [`RetryPolicy::max`], so the
    /// sequence never decreases.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Failure counter that applies a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a failure and return how long to suspend before the next attempt.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay(self.failures)
    }

    /// Forget past failures after a successful attempt.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Number of consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_then_saturate() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        let delays: Vec<_> = (0..6).map(|n| policy.delay(n)).collect();
        assert_eq!(
            delays,
            [0, 100, 200, 400, 500, 500].map(Duration::from_millis)
        );
        assert_eq!(policy.delay(u32::MAX), policy.max);
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            let next = backoff.fail();
            assert!(next >= last);
            last = next;
        }
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
    }
}
