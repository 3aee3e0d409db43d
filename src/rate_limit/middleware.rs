use super::limiter::RateLimiter;
use crate::metrics;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Route label used when the request did not match a route
const UNMATCHED_ROUTE: &str = "unmatched";

/// Axum middleware gating every request on the token bucket.
///
/// Install with `Router::route_layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware))`
/// so metrics are labelled by route template rather than raw path.
/// Admitted requests reach the wrapped handler; the rest get a 429 and the
/// handler is never called.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    if !limiter.allow() {
        warn!(route = %route, "Rate limit exceeded");
        metrics::record_rate_limit_exceeded(&route);

        return create_rate_limit_response(
            limiter.capacity(),
            limiter.config().retry_after_secs(),
        );
    }

    let remaining = limiter.tokens();
    debug!(route = %route, remaining, "Rate limit check passed");
    metrics::record_rate_limit_allowed(&route);

    let response = next.run(request).await;
    add_rate_limit_headers(response, limiter.capacity(), remaining)
}

/// Create a 429 Too Many Requests response with rate limit headers
fn create_rate_limit_response(limit: u32, retry_after: u64) -> Response {
    let mut headers = HeaderMap::new();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
    headers.insert("Retry-After", HeaderValue::from(retry_after));

    let body = serde_json::json!({
        "error": "Too many requests",
        "status": 429,
        "limit": limit,
        "retry_after": retry_after,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, body.to_string()).into_response()
}

/// Add rate limit headers to admitted responses
pub fn add_rate_limit_headers(mut response: Response, limit: u32, remaining: u32) -> Response {
    let headers = response.headers_mut();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));

    response
}
