use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing a single probe request
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the state gauge (0 = closed, 1 = open, 2 = half-open)
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Request counts for the current window.
///
/// The window starts at the last state transition (or the last periodic
/// clear while closed), so the numbers never span two states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    /// Every field is bounded by `requests`, so restarting the window when it
    /// is full keeps all of them from overflowing.
    fn restart_if_full(&mut self) {
        if self.requests == u32::MAX {
            self.clear();
        }
    }

    pub(crate) fn on_success(&mut self) {
        self.restart_if_full();
        self.requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn on_failure(&mut self) {
        self.restart_if_full();
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    pub(crate) fn clear(&mut self) {
        *self = Counts::default();
    }

    /// Fraction of requests in this window that failed.
    ///
    /// Returns `None` for an empty window so callers cannot divide by zero.
    pub fn failure_ratio(&self) -> Option<f64> {
        if self.requests == 0 {
            None
        } else {
            Some(f64::from(self.total_failures) / f64::from(self.requests))
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Diagnostic label used in logs, metrics and state change callbacks
    #[serde(default = "default_name")]
    pub name: String,

    /// Requests needed in the current window before the breaker may trip
    #[serde(default = "default_minimum_request_volume")]
    pub minimum_request_volume: u32,

    /// Failure ratio (0.0 - 1.0) at or above which the breaker trips
    #[serde(default = "default_failure_ratio_threshold")]
    pub failure_ratio_threshold: f64,

    /// Duration to wait in open state before transitioning to half-open
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Period after which closed-state counts are cleared (never when unset)
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_minimum_request_volume() -> u32 {
    10
}

fn default_failure_ratio_threshold() -> f64 {
    0.4
}

fn default_open_timeout_secs() -> u64 {
    10
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            minimum_request_volume: default_minimum_request_volume(),
            failure_ratio_threshold: default_failure_ratio_threshold(),
            open_timeout_secs: default_open_timeout_secs(),
            interval_secs: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Default trip predicate: enough volume and a high enough failure ratio
    pub fn should_trip(&self, counts: &Counts) -> bool {
        if counts.requests < self.minimum_request_volume {
            return false;
        }

        counts
            .failure_ratio()
            .map(|ratio| ratio >= self.failure_ratio_threshold)
            .unwrap_or(false)
    }
}

/// Circuit breaker metrics, accumulated over the breaker's lifetime
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    /// Number of requests that reached the wrapped operation
    pub total_requests: u64,
    /// Number of successful requests
    pub successful_requests: u64,
    /// Number of failed requests
    pub failed_requests: u64,
    /// Number of requests rejected without calling the operation
    pub rejected_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}
