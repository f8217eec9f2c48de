//! Delay schedule between rate-limited attempts.

use iptv_checker_config::{BackoffConfig, BackoffStrategy};
use std::time::Duration;

/// Backoff schedule applied after each HTTP 429.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// `initial * multiplier^n`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// The same delay every time.
    Fixed(Duration),
}

impl BackoffPolicy {
    pub fn from_config(cfg: &BackoffConfig) -> Self {
        let initial = Duration::from_millis(cfg.initial_delay_ms);
        match cfg.strategy {
            BackoffStrategy::Exponential => BackoffPolicy::Exponential {
                initial,
                multiplier: cfg.multiplier.max(1.0),
                max: Duration::from_millis(cfg.max_delay_ms.max(cfg.initial_delay_ms)),
            },
            BackoffStrategy::Fixed => BackoffPolicy::Fixed(initial),
        }
    }

    /// Delay before retry number `n` (0-based).
    pub fn delay(&self, n: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(n.min(i32::MAX as u32) as i32);
                let millis = initial.as_millis() as f64 * factor;
                if !millis.is_finite() || millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis.round() as u64)
                }
            }
        }
    }

    /// Sum of the first `k` delays.
    pub fn total(&self, k: u32) -> Duration {
        (0..k).map(|n| self.delay(n)).sum()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule_doubles_from_two_seconds() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
        assert_eq!(policy.total(3), Duration::from_secs(14));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        };
        assert_eq!(policy.delay(3), Duration::from_secs(10));
        assert_eq!(policy.delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_from_config() {
        let cfg = BackoffConfig {
            strategy: BackoffStrategy::Fixed,
            initial_delay_ms: 500,
            ..BackoffConfig::default()
        };
        let policy = BackoffPolicy::from_config(&cfg);
        assert_eq!(policy, BackoffPolicy::Fixed(Duration::from_millis(500)));
        assert_eq!(policy.total(4), Duration::from_secs(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_exponential_is_monotonic_and_bounded(
            initial_ms in 1u64..5_000,
            multiplier in 1.0f64..4.0,
            max_ms in 5_000u64..120_000,
            n in 0u32..40,
        ) {
            let policy = BackoffPolicy::Exponential {
                initial: Duration::from_millis(initial_ms),
                multiplier,
                max: Duration::from_millis(max_ms),
            };
            prop_assert!(policy.delay(n) <= policy.delay(n + 1));
            prop_assert!(policy.delay(n) <= Duration::from_millis(max_ms));
        }
    }
}
