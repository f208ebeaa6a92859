//! Retry policy for failed queue jobs
//!
//! The worker does not loop on a failing handler itself; it hands the job back
//! to the queue with a later `run_at` computed here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (first run included)
    pub max_attempts: u32,

    /// Base delay in seconds for exponential backoff
    pub base_delay_secs: u64,

    /// Maximum delay in seconds (caps exponential growth)
    pub max_delay_secs: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 60,
            max_delay_secs: 3600,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_attempts: u32, base_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            base_delay_secs,
            max_delay_secs,
            backoff_multiplier: 2.0,
        }
    }

    /// Whether a job that has already run `attempts` times may run again
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_secs as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_secs)
        };

        Duration::from_secs(delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_secs, 60);
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_delay_growth() {
        let config = RetryConfig::with_delays(5, 10, 1000);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(0));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[test]
    fn test_delay_cap() {
        let config = RetryConfig::with_delays(10, 100, 250);
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(250));
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(250));
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::new(3);
        assert!(config.should_retry(1));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }
}
