//! Rate limiting module
//!
//! A single in-memory token bucket guards the inbound request path:
//!
//! - **Token bucket**: starts full at `capacity`, one token per admitted request
//! - **Refill task**: adds one token every `refill_interval`, never above capacity
//! - **Middleware**: answers `429 Too Many Requests` when the bucket is empty
//!
//! # Example
//!
//! ```rust,no_run
//! use resilience::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
//! use axum::{middleware, routing::get, Router};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimitConfig {
//!         capacity: 5,
//!         refill_interval_ms: 1000,
//!     };
//!
//!     let limiter = Arc::new(RateLimiter::new(config).unwrap());
//!
//!     let app: Router = Router::new()
//!         .route("/", get(|| async { "Hello, World!" }))
//!         .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
//! }
//! ```

pub mod limiter;
pub mod middleware;
pub mod types;

// Re-export commonly used types
pub use limiter::RateLimiter;
pub use middleware::{add_rate_limit_headers, rate_limit_middleware};
pub use types::RateLimitConfig;
