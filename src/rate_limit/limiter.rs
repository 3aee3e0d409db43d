use super::types::RateLimitConfig;
use crate::error::{Error, Result};
use crate::metrics;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Token bucket rate limiter with a background refill task.
///
/// The bucket starts full. `allow` takes one token if any are left and never
/// waits; the refill task adds one token per interval up to capacity.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Arc<TokenBucket>,
    refill_task: JoinHandle<()>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: Mutex<u32>,
    capacity: u32,
}

impl TokenBucket {
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> bool {
        let mut tokens = self.lock();
        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&self) -> u32 {
        let mut tokens = self.lock();
        if *tokens < self.capacity {
            *tokens += 1;
        }
        *tokens
    }
}

impl RateLimiter {
    /// Create a new rate limiter and start its refill task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;

        let handle = Handle::try_current().map_err(|e| {
            Error::Internal(format!("Rate limiter refill requires a Tokio runtime: {}", e))
        })?;

        info!(
            capacity = config.capacity,
            refill_interval_ms = config.refill_interval_ms,
            "Creating rate limiter"
        );

        let bucket = Arc::new(TokenBucket {
            tokens: Mutex::new(config.capacity),
            capacity: config.capacity,
        });
        let period = config.refill_interval();
        let refill_task = handle.spawn(refill_loop(
            bucket.clone(),
            Instant::now() + period,
            period,
        ));

        Ok(Self {
            config,
            bucket,
            refill_task,
        })
    }

    /// Take a token if one is available
    pub fn allow(&self) -> bool {
        let allowed = self.bucket.try_acquire();
        if !allowed {
            debug!(capacity = self.bucket.capacity, "No tokens left");
        }
        allowed
    }

    /// Add a single token, clamped at capacity. Returns the new token count.
    pub fn refill(&self) -> u32 {
        self.bucket.refill()
    }

    /// Currently available tokens
    pub fn tokens(&self) -> u32 {
        *self.bucket.lock()
    }

    /// Maximum number of tokens
    pub fn capacity(&self) -> u32 {
        self.bucket.capacity
    }

    /// Time between refill ticks
    pub fn refill_interval(&self) -> Duration {
        self.config.refill_interval()
    }

    /// Limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tokens", &self.tokens())
            .finish()
    }
}

async fn refill_loop(bucket: Arc<TokenBucket>, start: Instant, period: Duration) {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let tokens = bucket.refill();
        metrics::record_rate_limit_tokens(tokens);
    }
}
