use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.backoff_base(),
            max: config.backoff_max().max(config.backoff_base()),
        }
    }

    /// Total calls allowed for transient failures, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Un-jittered delay before retry number `retry` (0 for the first retry):
    /// `base * 2^retry`, capped.
    pub fn anchor(&self, retry: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(retry);
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// Anchor shifted by a uniform offset in `[-base/2, +base/2]`, clamped to
    /// `[0, max]`.
    pub fn delay(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let anchor = self.anchor(retry).as_millis() as i64;
        let half = (self.base.as_millis() / 2) as i64;
        let offset = if half == 0 {
            0
        } else {
            rng.random_range(-half..=half)
        };
        let capped = (anchor + offset).clamp(0, self.max.as_millis() as i64);
        Duration::from_millis(capped as u64)
    }

    pub fn next_delay(&self, retry: u32) -> Duration {
        self.delay(retry, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 400,
            backoff_max_ms: 2_000,
        })
    }

    #[test]
    fn anchor_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.anchor(0), Duration::from_millis(400));
        assert_eq!(p.anchor(1), Duration::from_millis(800));
        assert_eq!(p.anchor(2), Duration::from_millis(1_600));
        assert_eq!(p.anchor(3), Duration::from_millis(2_000));
        assert_eq!(p.anchor(40), Duration::from_millis(2_000));
    }

    #[test]
    fn jitter_stays_within_half_base() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..3 {
            let anchor = p.anchor(retry).as_millis() as i64;
            for _ in 0..200 {
                let d = p.delay(retry, &mut rng).as_millis() as i64;
                assert!((anchor - 200..=anchor + 200).contains(&d));
                assert!(d <= 2_000);
            }
        }
    }

    #[test]
    fn zero_base_means_no_wait() {
        let p = RetryPolicy::new(&RetryConfig {
            max_attempts: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        });
        assert_eq!(p.next_delay(5), Duration::ZERO);
        assert_eq!(p.max_attempts(), 1);
    }
}
