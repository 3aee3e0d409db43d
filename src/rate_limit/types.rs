use crate::config::MAX_DURATION_SECS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of tokens (burst size), the bucket starts full
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Time between refill ticks, each tick adds one token
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

fn default_capacity() -> u32 {
    5
}

fn default_refill_interval_ms() -> u64 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Get the refill interval as a Duration
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Whole seconds a throttled client should wait for the next token
    pub fn retry_after_secs(&self) -> u64 {
        let interval = self.refill_interval();
        let secs = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(
                "Rate limit capacity must be > 0".to_string(),
            ));
        }
        if self.refill_interval_ms == 0 {
            return Err(Error::Config(
                "Rate limit refill interval must be > 0".to_string(),
            ));
        }
        if self.refill_interval_ms / 1000 > MAX_DURATION_SECS {
            return Err(Error::Config(format!(
                "Rate limit refill interval must be at most {} seconds",
                MAX_DURATION_SECS
            )));
        }
        Ok(())
    }
}
