//! Exponential backoff computation.
//!
//! Backoff is computed, never slept on here: callers decide when to act on
//! the returned delay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `base * 2^attempts`, capped at `max`.
///
/// # Example
///
/// ```
/// use pulse_resilience::ExponentialBackoff;
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::new(Duration::from_secs(3), Duration::from_secs(60));
/// assert_eq!(backoff.delay_for(0), Duration::from_secs(3));
/// assert_eq!(backoff.delay_for(1), Duration::from_secs(6));
/// assert_eq!(backoff.delay_for(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base: Duration,
    /// Upper bound for any delay.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff with the given base and cap.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the delay after `attempts` previous attempts.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubling_and_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let delays: Vec<u128> = (0..6).map(|a| backoff.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_huge_attempts_do_not_overflow() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(3), Duration::from_secs(300));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(300));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_bounded(attempts in 0u32..64, base_ms in 1u64..10_000) {
            let backoff = ExponentialBackoff::new(
                Duration::from_millis(base_ms),
                Duration::from_secs(120),
            );
            let current = backoff.delay_for(attempts);
            let next = backoff.delay_for(attempts + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_secs(120));
        }
    }
}
