use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Counts};
use crate::error::BreakerError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Circuit breaker service managing one breaker per backend
#[derive(Debug, Clone)]
pub struct CircuitBreakerService {
    /// Circuit breakers per backend
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Template configuration, `name` is replaced by the backend name
    config: CircuitBreakerConfig,
}

impl CircuitBreakerService {
    /// Create a new circuit breaker service
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Get or create the circuit breaker for a backend
    pub fn breaker(&self, backend: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(backend.to_string())
            .or_insert_with(|| {
                debug!(backend = backend, "Creating new circuit breaker");
                let config = CircuitBreakerConfig {
                    name: backend.to_string(),
                    ..self.config.clone()
                };
                Arc::new(CircuitBreaker::new(config))
            })
            .clone()
    }

    /// Run a synchronous operation through the backend's breaker
    pub fn execute<F, T, E>(&self, backend: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.breaker(backend).execute(operation)
    }

    /// Run an asynchronous operation through the backend's breaker
    pub async fn call<F, Fut, T, E>(&self, backend: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(backend);
        breaker.call(operation).await
    }

    /// Get the state of the circuit breaker for a backend
    pub fn state(&self, backend: &str) -> CircuitState {
        match self.breakers.get(backend) {
            Some(breaker) => breaker.state(),
            None => CircuitState::Closed,
        }
    }

    /// Get the current window counts for a backend
    pub fn counts(&self, backend: &str) -> Option<Counts> {
        self.breakers.get(backend).map(|breaker| breaker.counts())
    }

    /// Get metrics for a backend
    pub fn metrics(&self, backend: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(backend).map(|breaker| breaker.metrics())
    }

    /// Get all backend names with circuit breakers
    pub fn backends(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Get metrics and state for all backends
    pub fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        // Clone out of the map first so no shard lock is held while a
        // breaker fires its state change observer
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        breakers
            .into_iter()
            .map(|(backend, breaker)| (backend, breaker.metrics(), breaker.state()))
            .collect()
    }
}
