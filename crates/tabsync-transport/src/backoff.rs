//! Reconnection backoff
//!
//! Delay for attempt `n` (zero-based) is `min(base * 2^n, max)` plus a uniform
//! random jitter in `[0, jitter]`. The same policy paces mutation retries.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff settings as they appear in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 30_000,
            jitter_ms: 500,
        }
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            Duration::from_millis(config.jitter_ms),
        )
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Policy without jitter, for deterministic timing
    pub fn without_jitter(base: Duration, max: Duration) -> Self {
        Self::new(base, max, Duration::ZERO)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Capped exponential delay for `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay for `attempt` including random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.random_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::from_secs(1));
        assert_eq!(p.base_delay(1), Duration::from_secs(2));
        assert_eq!(p.base_delay(4), Duration::from_secs(16));
        assert_eq!(p.base_delay(5), Duration::from_secs(30));
        assert_eq!(p.base_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_base_delay_non_decreasing() {
        let p = policy();
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let d = p.base_delay(attempt);
            assert!(d >= last, "attempt {} went down", attempt);
            assert!(d <= p.max());
            last = d;
        }
    }

    #[test]
    fn test_jitter_is_bounded() {
        let p = policy();
        for attempt in 0..10 {
            let d = p.delay(attempt);
            assert!(d >= p.base_delay(attempt));
            assert!(d <= p.base_delay(attempt) + p.jitter());
        }
    }

    #[test]
    fn test_config_defaults() {
        let p = BackoffPolicy::default();
        assert_eq!(p.base(), Duration::from_secs(1));
        assert_eq!(p.max(), Duration::from_secs(30));
        assert_eq!(p.jitter(), Duration::from_millis(500));

        let flat = BackoffPolicy::without_jitter(Duration::from_millis(10), Duration::from_millis(40));
        assert_eq!(flat.delay(3), Duration::from_millis(40));
    }
}
