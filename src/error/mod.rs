use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Outcome of a call made through a circuit breaker.
///
/// `OpenCircuit` and `TooManyRequests` are rejections: the wrapped operation
/// was never invoked and nothing was counted. `Operation` carries the
/// operation's own error.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    OpenCircuit,

    #[error("too many requests")]
    TooManyRequests,

    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Whether the breaker refused the call without running it.
    ///
    /// Callers should not retry a rejected call immediately.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Operation(_))
    }

    /// Metric label for a rejection
    pub fn rejection_reason(&self) -> Option<&'static str> {
        match self {
            BreakerError::OpenCircuit => Some("open"),
            BreakerError::TooManyRequests => Some("half_open_saturated"),
            BreakerError::Operation(_) => None,
        }
    }

    /// Get the operation error, if the operation ran and failed
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BreakerError<Error>> for Error {
    fn from(err: BreakerError<Error>) -> Self {
        match err {
            BreakerError::OpenCircuit => Error::CircuitOpen("circuit breaker is open".to_string()),
            BreakerError::TooManyRequests => {
                Error::CircuitOpen("half-open trial already in progress".to_string())
            }
            BreakerError::Operation(e) => e,
        }
    }
}
