pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod server;

use crate::circuit_breaker::CircuitBreaker;
use crate::client::BreakerClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::MetricsService;
use crate::rate_limit::RateLimiter;
use crate::server::{build_app, UpstreamState};
use std::sync::Arc;
use tracing::info;

/// Initialize the rate limited server
pub async fn init_server(config: Config) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting server");

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone())?);

    let upstream = match &config.upstream {
        Some(upstream) => {
            let breaker = CircuitBreaker::new(config.circuit_breaker.clone()).with_on_state_change(
                |name, from, to| {
                    info!(breaker = %name, from = %from, to = %to, "Upstream circuit changed state");
                },
            );
            let client = BreakerClient::new(Arc::new(breaker), upstream.timeout())?;
            info!(url = %upstream.url, "Upstream guarded by circuit breaker");

            Some(UpstreamState {
                client,
                url: upstream.url.clone(),
            })
        }
        None => None,
    };

    let metrics = MetricsService::new()?;
    let app = build_app(limiter, upstream, Some(metrics));

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
