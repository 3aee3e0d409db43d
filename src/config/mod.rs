use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for any configured duration, in seconds (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Token bucket guarding inbound requests
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker guarding outbound requests
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Upstream service reached through the circuit breaker
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream URL
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;

        let breaker = &self.circuit_breaker;
        if breaker.name.is_empty() {
            return Err(Error::Config(
                "Circuit breaker name cannot be empty".to_string(),
            ));
        }
        if breaker.minimum_request_volume == 0 {
            return Err(Error::Config(
                "Circuit breaker minimum request volume must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&breaker.failure_ratio_threshold) {
            return Err(Error::Config(format!(
                "Circuit breaker failure ratio threshold must be between 0 and 1, got {}",
                breaker.failure_ratio_threshold
            )));
        }
        check_duration("Circuit breaker open timeout", breaker.open_timeout_secs)?;
        if let Some(interval_secs) = breaker.interval_secs {
            check_duration("Circuit breaker interval", interval_secs)?;
        }

        if let Some(upstream) = &self.upstream {
            if !upstream.url.starts_with("http://") && !upstream.url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "Upstream URL must start with http:// or https://: {}",
                    upstream.url
                )));
            }
            if upstream.timeout_secs == 0 {
                return Err(Error::Config(
                    "Upstream timeout must be > 0".to_string(),
                ));
            }
            check_duration("Upstream timeout", upstream.timeout_secs)?;
        }

        Ok(())
    }
}

fn check_duration(what: &str, secs: u64) -> Result<()> {
    if secs > MAX_DURATION_SECS {
        return Err(Error::Config(format!(
            "{} must be at most {} seconds, got {}",
            what, MAX_DURATION_SECS, secs
        )));
    }
    Ok(())
}
