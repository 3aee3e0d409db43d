use crate::client::BreakerClient;
use crate::error::Result;
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State for the upstream route
#[derive(Debug, Clone)]
pub struct UpstreamState {
    pub client: BreakerClient,
    pub url: String,
}

/// Greeting handler behind the rate limiter
pub async fn hello_handler() -> &'static str {
    "Hello, World!"
}

/// Forward a GET to the upstream through its circuit breaker
pub async fn upstream_handler(State(state): State<UpstreamState>) -> Result<impl IntoResponse> {
    let response = state.client.get(&state.url).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);

    Ok((status, response.body))
}

/// Build the application router.
///
/// `/` and `/upstream` sit behind the rate limiter; `/metrics` does not.
pub fn build_app(
    limiter: Arc<RateLimiter>,
    upstream: Option<UpstreamState>,
    metrics: Option<MetricsService>,
) -> Router {
    let mut limited = Router::new().route("/", get(hello_handler));

    if let Some(upstream) = upstream {
        limited = limited.merge(
            Router::new()
                .route("/upstream", get(upstream_handler))
                .with_state(upstream),
        );
    }

    let mut app = limited.route_layer(middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ));

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(TraceLayer::new_for_http())
}
