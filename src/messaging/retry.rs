//! Exponential backoff with jitter for the publish retry budget.
//!
//! The shape mirrors the framework's `utils::retry::RetryConfig`; this copy
//! drives `backon`'s retry loop around each `MessagingPort` adapter's publish
//! call instead of a hand-rolled loop.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::RetrySettings;

/// Configuration for the publish retry budget and the nonce-resync backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_retries: 5,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.initial_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
            max_retries: settings.max_attempts,
            jitter: 0.25,
        }
    }

    /// Build a `backon` exponential-backoff policy for a single publish call.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries as usize)
            .with_jitter()
    }

    /// Delay for a given 0-indexed attempt: `base * 2^attempt`, capped, with
    /// deterministic time-seeded jitter. Used by the blockchain nonce-resync
    /// retry, which needs a single concrete delay rather than a `backon` loop.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);

        if self.jitter <= 0.0 {
            return Duration::from_millis(capped_ms);
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0) as u64;
        let hash = now.wrapping_mul(31).wrapping_add(attempt as u64 * 17);
        let jitter_pct = ((hash % 1000) as f64 / 1000.0) * 2.0 - 1.0;
        let jitter_factor = 1.0 + (jitter_pct * self.jitter);
        Duration::from_millis((capped_ms as f64 * jitter_factor) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_publish_retry_budget() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
            jitter: 0.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_retries: 10,
            jitter: 0.0,
        };
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
            jitter: 0.25,
        };
        let ms = config.delay_for_attempt(0).as_millis() as f64;
        assert!(ms >= 750.0 && ms <= 1250.0, "delay {ms} out of bound");
    }

    #[test]
    fn should_retry_respects_budget() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }
}
