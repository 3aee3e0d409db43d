use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Counts};
use crate::error::BreakerError;
use crate::metrics;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Predicate deciding whether a closed circuit should open
pub type ReadyToTrip = dyn Fn(&Counts) -> bool + Send + Sync;

/// Observer invoked with `(name, from, to)` after every state transition
pub type StateChangeHook = dyn Fn(&str, CircuitState, CircuitState) + Send + Sync;

type Transition = Option<(CircuitState, CircuitState)>;

/// Circuit breaker guarding a single dependency.
///
/// All bookkeeping happens under one mutex that is never held while the
/// wrapped operation runs.
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Custom trip predicate, replaces the volume/ratio check when set
    ready_to_trip: Option<Box<ReadyToTrip>>,
    /// Transition observer
    on_state_change: Option<Box<StateChangeHook>>,
    /// Current state
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Counts for the current window
    counts: Counts,
    /// Bumped on every transition or window reset
    generation: u64,
    /// Time of the last state transition
    changed_at: Instant,
    /// End of the closed-state counting window, if an interval is configured
    window_expires_at: Option<Instant>,
    /// Whether the half-open trial request is outstanding
    half_open_in_flight: bool,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

/// Admission ticket for a request that reached the wrapped operation.
///
/// Dropping it without calling `finish` (panic or cancelled future) records
/// a failure so the half-open trial slot is always released.
struct PendingRequest<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl PendingRequest<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                breaker = %self.breaker.name(),
                "Request abandoned before completion, recording failure"
            );
            self.breaker.after_request(self.generation, false);
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            breaker = %config.name,
            minimum_request_volume = config.minimum_request_volume,
            failure_ratio_threshold = config.failure_ratio_threshold,
            open_timeout_secs = config.open_timeout_secs,
            "Creating circuit breaker"
        );

        let now = Instant::now();
        let window_expires_at = window_end(&config, now);
        metrics::record_circuit_breaker_state(&config.name, CircuitState::Closed.as_gauge());

        Self {
            config,
            ready_to_trip: None,
            on_state_change: None,
            state: Mutex::new(State {
                circuit_state: CircuitState::Closed,
                counts: Counts::default(),
                generation: 0,
                changed_at: now,
                window_expires_at,
                half_open_in_flight: false,
                metrics: CircuitBreakerMetrics::default(),
            }),
        }
    }

    /// Replace the default trip predicate
    pub fn with_ready_to_trip<F>(mut self, ready_to_trip: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Box::new(ready_to_trip));
        self
    }

    /// Register an observer for state transitions
    pub fn with_on_state_change<F>(mut self, on_state_change: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(on_state_change));
        self
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run a synchronous operation through the breaker.
    ///
    /// Returns `OpenCircuit` or `TooManyRequests` without calling `operation`
    /// when the breaker refuses the request; otherwise the operation's own
    /// result, with its error wrapped in `BreakerError::Operation`.
    pub fn execute<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let pending = self.before_request::<E>()?;
        let result = operation();
        pending.finish(result.is_ok());
        result.map_err(BreakerError::Operation)
    }

    /// Run an asynchronous operation through the breaker
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let pending = self.before_request::<E>()?;
        let result = operation().await;
        pending.finish(result.is_ok());
        result.map_err(BreakerError::Operation)
    }

    /// Get current state, applying any elapsed open timeout
    pub fn state(&self) -> CircuitState {
        let (circuit_state, transition) = {
            let mut state = self.lock();
            let transition = self.refresh(&mut state, Instant::now());
            (state.circuit_state, transition)
        };
        self.notify(transition);
        circuit_state
    }

    /// Get counts for the current window
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_request<E>(&self) -> Result<PendingRequest<'_>, BreakerError<E>> {
        let (admission, transition) = {
            let mut state = self.lock();
            let now = Instant::now();
            let transition = self.refresh(&mut state, now);

            let admission = match state.circuit_state {
                CircuitState::Closed => Ok(state.generation),
                CircuitState::Open => {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        breaker = %self.name(),
                        time_remaining = ?self
                            .config
                            .open_timeout()
                            .saturating_sub(now.duration_since(state.changed_at)),
                        "Circuit breaker open, rejecting request"
                    );
                    Err(BreakerError::OpenCircuit)
                }
                CircuitState::HalfOpen if state.half_open_in_flight => {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        breaker = %self.name(),
                        "Half-open trial already in flight, rejecting"
                    );
                    Err(BreakerError::TooManyRequests)
                }
                CircuitState::HalfOpen => {
                    state.half_open_in_flight = true;
                    debug!(breaker = %self.name(), "Allowing half-open trial request");
                    Ok(state.generation)
                }
            };

            (admission, transition)
        };

        self.notify(transition);

        match admission {
            Ok(generation) => Ok(PendingRequest {
                breaker: self,
                generation,
                finished: false,
            }),
            Err(e) => {
                if let Some(reason) = e.rejection_reason() {
                    metrics::record_circuit_breaker_rejection(self.name(), reason);
                }
                Err(e)
            }
        }
    }

    fn after_request(&self, generation: u64, success: bool) {
        let transition = {
            let mut state = self.lock();
            let transition = self.refresh(&mut state, Instant::now());

            if generation != state.generation {
                debug!(
                    breaker = %self.name(),
                    generation,
                    current = state.generation,
                    "Discarding outcome from a previous window"
                );
                transition
            } else {
                state.metrics.total_requests += 1;
                if success {
                    state.metrics.successful_requests += 1;
                    self.on_success(&mut state)
                } else {
                    state.metrics.failed_requests += 1;
                    self.on_failure(&mut state)
                }
            }
        };

        self.notify(transition);
    }

    fn on_success(&self, state: &mut State) -> Transition {
        state.counts.on_success();

        match state.circuit_state {
            CircuitState::Closed => self.trip_if_ready(state),
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name(), "Half-open trial succeeded");
                self.set_state(state, CircuitState::Closed, Instant::now())
            }
            CircuitState::Open => None,
        }
    }

    fn on_failure(&self, state: &mut State) -> Transition {
        state.counts.on_failure();

        match state.circuit_state {
            CircuitState::Closed => {
                debug!(
                    breaker = %self.name(),
                    requests = state.counts.requests,
                    failures = state.counts.total_failures,
                    "Request failed in closed state"
                );
                self.trip_if_ready(state)
            }
            CircuitState::HalfOpen => {
                warn!(
                    breaker = %self.name(),
                    "Half-open trial failed, reopening circuit"
                );
                self.set_state(state, CircuitState::Open, Instant::now())
            }
            CircuitState::Open => None,
        }
    }

    fn trip_if_ready(&self, state: &mut State) -> Transition {
        let ready = match &self.ready_to_trip {
            Some(ready_to_trip) => ready_to_trip(&state.counts),
            None => self.config.should_trip(&state.counts),
        };

        if ready {
            warn!(
                breaker = %self.name(),
                requests = state.counts.requests,
                failures = state.counts.total_failures,
                "Failure threshold reached, opening circuit"
            );
            self.set_state(state, CircuitState::Open, Instant::now())
        } else {
            None
        }
    }

    /// Apply time-based changes: open timeout expiry and closed window reset
    fn refresh(&self, state: &mut State, now: Instant) -> Transition {
        match state.circuit_state {
            CircuitState::Closed => {
                if matches!(state.window_expires_at, Some(expires_at) if expires_at <= now) {
                    debug!(breaker = %self.name(), "Clearing counts for new window");
                    self.new_generation(state, now);
                }
                None
            }
            CircuitState::Open => {
                if now.duration_since(state.changed_at) >= self.config.open_timeout() {
                    self.set_state(state, CircuitState::HalfOpen, now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => None,
        }
    }

    fn set_state(&self, state: &mut State, to: CircuitState, now: Instant) -> Transition {
        let from = state.circuit_state;
        if from == to {
            return None;
        }

        info!(
            breaker = %self.name(),
            from = %from,
            to = %to,
            "Circuit breaker state change"
        );

        state.circuit_state = to;
        state.changed_at = now;
        state.half_open_in_flight = false;
        self.new_generation(state, now);
        // Under the lock so the gauge follows transition order
        metrics::record_circuit_breaker_state(self.name(), to.as_gauge());

        match to {
            CircuitState::Open => state.metrics.circuit_opened_count += 1,
            CircuitState::HalfOpen => state.metrics.circuit_half_opened_count += 1,
            CircuitState::Closed => state.metrics.circuit_closed_count += 1,
        }

        Some((from, to))
    }

    fn new_generation(&self, state: &mut State, now: Instant) {
        state.generation += 1;
        state.counts.clear();
        state.window_expires_at = match state.circuit_state {
            CircuitState::Closed => window_end(&self.config, now),
            CircuitState::Open | CircuitState::HalfOpen => None,
        };
    }

    /// Publish a transition; must be called with the state lock released
    fn notify(&self, transition: Transition) {
        if let Some((from, to)) = transition {
            metrics::record_circuit_breaker_transition(self.name(), from, to);

            if let Some(on_state_change) = &self.on_state_change {
                on_state_change(self.name(), from, to);
            }
        }
    }
}

/// End of a closed-state window starting at `now`; an interval too large to
/// represent never expires.
fn window_end(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    config
        .interval()
        .and_then(|interval| now.checked_add(interval))
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: "test-backend".to_string(),
            minimum_request_volume: 10,
            failure_ratio_threshold: 0.4,
            open_timeout_secs: 10,
            interval_secs: None,
        }
    }

    fn fail(cb: &CircuitBreaker) {
        let _ = cb.execute(|| Err::<(), _>("boom"));
    }

    fn succeed(cb: &CircuitBreaker) {
        let _ = cb.execute(|| Ok::<_, &str>(()));
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..10 {
            fail(cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new(config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.execute(|| Ok::<_, &str>(42)).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_below_minimum_volume_never_opens() {
        let cb = CircuitBreaker::new(config());

        for _ in 0..9 {
            fail(&cb);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert_eq!(cb.counts().total_failures, 9);
    }

    #[tokio::test]
    async fn test_opens_at_failure_ratio() {
        let cb = CircuitBreaker::new(config());

        for _ in 0..6 {
            succeed(&cb);
        }
        for _ in 0..3 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test]
    async fn test_stays_closed_below_failure_ratio() {
        let cb = CircuitBreaker::new(config());

        for _ in 0..7 {
            succeed(&cb);
        }
        for _ in 0..3 {
            fail(&cb);
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().requests, 10);
    }

    #[tokio::test]
    async fn test_success_can_trip_the_circuit() {
        let cb = CircuitBreaker::new(config());

        for _ in 0..5 {
            fail(&cb);
        }
        for _ in 0..4 {
            succeed(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        // 5 failures out of 10 requests, evaluated after a success
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_calling_operation() {
        let cb = CircuitBreaker::new(config());
        trip(&cb);

        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let result = cb.execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            });
            assert!(matches!(result, Err(BreakerError::OpenCircuit)));
        }

        tokio::time::advance(Duration::from_secs(9)).await;
        let result = cb.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(BreakerError::OpenCircuit)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.metrics().rejected_requests, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_calls_operation_once() {
        let cb = CircuitBreaker::new(config());
        trip(&cb);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let calls = AtomicUsize::new(0);
        let result = cb.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>("recovered")
        });

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_on_success() {
        let cb = CircuitBreaker::new(config());
        trip(&cb);

        tokio::time::advance(Duration::from_secs(11)).await;
        succeed(&cb);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(cb.metrics().circuit_closed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new(config());
        trip(&cb);

        tokio::time::advance(Duration::from_secs(11)).await;
        let result = cb.execute(|| Err::<(), _>("still down"));

        assert!(matches!(result, Err(BreakerError::Operation("still down"))));
        assert_eq!(cb.state(), CircuitState::Open);

        // The open timeout restarts from the reopen
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = Arc::new(CircuitBreaker::new(config()));
        trip(&cb);
        tokio::time::advance(Duration::from_secs(11)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let attempts = (0..5).map(|_| {
            let cb = cb.clone();
            let calls = calls.clone();
            async move {
                cb.call(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, &str>(())
                })
                .await
            }
        });

        let results = futures::future::join_all(attempts).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(BreakerError::TooManyRequests)))
                .count(),
            4
        );
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_releases_half_open_slot() {
        let cb = CircuitBreaker::new(config());
        trip(&cb);
        tokio::time::advance(Duration::from_secs(11)).await;

        let trial = cb.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, &str>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_secs(1), trial).await;
        assert!(timed_out.is_err());

        // An abandoned trial counts as a failure
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_panicking_operation_counts_as_failure() {
        let cb = CircuitBreaker::new(config());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cb.execute(|| -> Result<(), &str> { panic!("operation panicked") });
        }));

        assert!(result.is_err());
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test]
    async fn test_state_change_callback() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let recorded = transitions.clone();
        let cb = CircuitBreaker::new(config()).with_on_state_change(move |name, from, to| {
            recorded.lock().unwrap().push((name.to_string(), from, to));
        });

        trip(&cb);

        let transitions = transitions.lock().unwrap();
        assert_eq!(
            *transitions,
            vec![(
                "test-backend".to_string(),
                CircuitState::Closed,
                CircuitState::Open
            )]
        );
    }

    #[tokio::test]
    async fn test_custom_ready_to_trip() {
        let cb = CircuitBreaker::new(config()).with_ready_to_trip(|counts| {
            counts.consecutive_failures >= 3
        });

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_clears_closed_counts() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            interval_secs: Some(60),
            ..config()
        });

        for _ in 0..9 {
            fail(&cb);
        }
        assert_eq!(cb.counts().requests, 9);

        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_discarded() {
        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            interval_secs: Some(3),
            ..config()
        }));

        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err::<(), _>("late failure")
                })
                .await
            })
        };

        // Window rolls over at 3s, the slow call finishes at 5s
        tokio::time::sleep(Duration::from_secs(4)).await;
        succeed(&cb);
        let result = slow.await.unwrap();

        assert!(matches!(result, Err(BreakerError::Operation(_))));
        assert_eq!(cb.counts().total_failures, 0);
        assert_eq!(cb.counts().total_successes, 1);
    }

    #[tokio::test]
    async fn test_metrics_tracking() {
        let cb = CircuitBreaker::new(config());

        succeed(&cb);
        for _ in 0..9 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        fail(&cb);

        let metrics = cb.metrics();
        assert_eq!(metrics.total_requests, 10);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 9);
        assert_eq!(metrics.rejected_requests, 1);
        assert_eq!(metrics.circuit_opened_count, 1);
    }

    #[tokio::test]
    async fn test_full_counts_window_does_not_overflow_or_trip() {
        let cb = CircuitBreaker::new(config());
        {
            let mut state = cb.lock();
            state.counts.requests = u32::MAX;
            state.counts.total_successes = u32::MAX - 1000;
            state.counts.total_failures = 1000;
            state.counts.consecutive_successes = 10;
        }

        assert!(cb.execute(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().requests, 1);
        assert_eq!(cb.counts().total_successes, 1);

        // A handful of failures in the fresh window stays under the volume
        for _ in 0..5 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_huge_interval_never_expires() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            interval_secs: Some(u64::MAX),
            ..config()
        });

        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().requests, 2);

        trip(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    fn state_gauge(handle: &PrometheusHandle, breaker: &str) -> Option<f64> {
        let prefix = format!("resilience_circuit_breaker_state{{breaker=\"{}\"}}", breaker);
        handle
            .render()
            .lines()
            .find(|line| line.starts_with(&prefix))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[tokio::test]
    async fn test_state_gauge_follows_transitions() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            let cb = CircuitBreaker::new(CircuitBreakerConfig {
                name: "gauge-test".to_string(),
                open_timeout_secs: 0,
                ..config()
            });
            assert_eq!(state_gauge(&handle, "gauge-test"), Some(0.0));

            for _ in 0..10 {
                fail(&cb);
            }
            assert_eq!(state_gauge(&handle, "gauge-test"), Some(1.0));

            // Zero timeout: the next read moves to half-open
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            assert_eq!(state_gauge(&handle, "gauge-test"), Some(2.0));

            succeed(&cb);
            assert_eq!(cb.state(), CircuitState::Closed);
            assert_eq!(state_gauge(&handle, "gauge-test"), Some(0.0));
        });
    }
}
