//! Bounded poll-sleep retry budgets.

use std::time::Duration;

/// Retry budget: keep trying every `interval` until `budget` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time allowed for retries.
    pub budget: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Thirty seconds at 250 ms intervals, used for file locks and post-processing.
    pub const DEFAULT: Self = Self {
        budget: Duration::from_secs(30),
        interval: Duration::from_millis(250),
    };

    /// Number of attempts the budget allows, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let attempts = self.budget.as_millis() / self.interval.as_millis().max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_120_attempts() {
        assert_eq!(RetryPolicy::DEFAULT.attempts(), 120);
    }

    #[test]
    fn degenerate_policies_still_try_once() {
        let zero = RetryPolicy {
            budget: Duration::ZERO,
            interval: Duration::from_millis(10),
        };
        assert_eq!(zero.attempts(), 1);
        let no_interval = RetryPolicy {
            budget: Duration::from_secs(1),
            interval: Duration::ZERO,
        };
        assert_eq!(no_interval.attempts(), 1);
    }
}
