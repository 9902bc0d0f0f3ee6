//! API error types and JSON error response formatting.
//!
//! Every failure leaves the server as `{ "error": code, "message": msg }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use costlens_agent::ChatError;
use costlens_core::error::CostlensError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 Bad Request - malformed body, message or id.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// 429 Too Many Requests - rate limit exceeded.
    #[error("too many requests")]
    TooManyRequests,
    /// 500 Internal Server Error. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
    /// 503 Service Unavailable - component not ready.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Rate limit exceeded".to_string(),
            ),
            ApiError::Internal(detail) => {
                warn!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<CostlensError> for ApiError {
    fn from(err: CostlensError) -> Self {
        match &err {
            CostlensError::Config(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
