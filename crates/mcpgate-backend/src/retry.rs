//! Retry policy with exponential backoff and jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff parameters for backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Exponential multiplier
    pub multiplier: f64,
    /// Jitter factor in [0.0, 1.0]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Jittered delay before retry `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter;
        let jittered = (delay_ms * jitter).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(jittered as u64)
    }

    /// Whether a retryable failure on `attempt` (0-based attempt count so
    /// far) should be retried, given the remaining deadline
    pub fn should_retry(&self, attempts_so_far: u32, remaining: Duration) -> bool {
        attempts_so_far <= self.max_retries && remaining > self.delay_for(attempts_so_far)
    }
}
