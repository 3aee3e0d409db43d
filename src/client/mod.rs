use crate::circuit_breaker::CircuitBreaker;
use crate::error::{BreakerError, Error, Result};
use crate::metrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Successful upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Body as UTF-8 text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client whose requests go through a circuit breaker.
///
/// Transport errors and non-2xx statuses both count as failures.
#[derive(Debug, Clone)]
pub struct BreakerClient {
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerClient {
    /// Create a client with the given per-request timeout
    pub fn new(breaker: Arc<CircuitBreaker>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, breaker))
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: reqwest::Client, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }

    /// The breaker guarding this client
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Issue a GET request through the breaker
    pub async fn get(&self, url: &str) -> std::result::Result<UpstreamResponse, BreakerError<Error>> {
        let result = self.breaker.call(|| self.fetch(url)).await;

        if let Err(e) = &result {
            if e.is_rejection() {
                debug!(url = %url, error = %e, "Request rejected by circuit breaker");
            } else {
                warn!(url = %url, error = %e, "Upstream request failed");
            }
        }

        result
    }

    async fn fetch(&self, url: &str) -> Result<UpstreamResponse> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        metrics::record_backend_request(
            self.breaker.name(),
            status.as_u16(),
            start.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        Ok(UpstreamResponse {
            status: status.as_u16(),
            body,
        })
    }
}
