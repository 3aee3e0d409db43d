use crate::circuit_breaker::CircuitState;
use crate::error::{Error, Result};
use axum::{extract::State, http::header, response::IntoResponse};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service and install it as the global recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            Error::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Circuit breaker metrics
        describe_gauge!(
            "resilience_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "resilience_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_counter!(
            "resilience_circuit_breaker_rejections_total",
            "Total number of calls rejected without reaching the backend"
        );

        // Backend metrics
        describe_counter!(
            "resilience_backend_requests_total",
            "Total number of requests sent to backends"
        );
        describe_histogram!(
            "resilience_backend_duration_seconds",
            "Backend request latencies in seconds"
        );

        // Rate limiting metrics
        describe_counter!(
            "resilience_rate_limit_allowed_total",
            "Total number of requests admitted by the rate limiter"
        );
        describe_counter!(
            "resilience_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_gauge!(
            "resilience_rate_limit_tokens",
            "Tokens available after the last refill tick"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record circuit breaker state
/// State: 0 = Closed, 1 = Open, 2 = HalfOpen
pub fn record_circuit_breaker_state(breaker: &str, state: u8) {
    let labels = [("breaker", breaker.to_string())];
    gauge!("resilience_circuit_breaker_state", &labels).set(state as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("breaker", breaker.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!("resilience_circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record a call rejected by a circuit breaker
pub fn record_circuit_breaker_rejection(breaker: &str, reason: &str) {
    let labels = [
        ("breaker", breaker.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!("resilience_circuit_breaker_rejections_total", &labels).increment(1);
}

/// Record a backend request metric
pub fn record_backend_request(backend: &str, status: u16, duration: f64) {
    let labels = [
        ("backend", backend.to_string()),
        ("status", status.to_string()),
    ];

    counter!("resilience_backend_requests_total", &labels).increment(1);
    histogram!("resilience_backend_duration_seconds", &labels).record(duration);
}

/// Record a request admitted by the rate limiter, labelled by route template
pub fn record_rate_limit_allowed(route: &str) {
    let labels = [("path", route.to_string())];
    counter!("resilience_rate_limit_allowed_total", &labels).increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded(route: &str) {
    let labels = [("path", route.to_string())];
    counter!("resilience_rate_limit_exceeded_total", &labels).increment(1);
}

/// Record the token count after a refill tick
pub fn record_rate_limit_tokens(tokens: u32) {
    gauge!("resilience_rate_limit_tokens").set(f64::from(tokens));
}
