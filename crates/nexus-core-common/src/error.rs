//! Centralized error taxonomy for the messaging core.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that can be directly converted to API responses. Variant
//! names follow the kinds named in the core's error-handling design, not
//! ad-hoc per-endpoint messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across the messaging engine.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    /// Malformed arguments, empty recipient set, unknown recipient device.
    /// 400-class; never retried.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Missing or invalid bearer credential.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Participation or device-ownership failure.
    #[error("Permission denied")]
    PermissionDenied,

    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Duplicate key-id upload, duplicate participant.
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// Idempotency-key collision not matching the stored record — should be
    /// impossible; indicates client misuse.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Transient storage or bus failure; clients retry with backoff.
    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for NexusError {
    /// Repository functions return `anyhow::Result` but sometimes need to
    /// surface a specific `NexusError` variant (e.g. a unique-violation
    /// remapped to `AlreadyExists`) through that boundary. Unwrap one before
    /// falling back to `Internal`, so that variant isn't flattened into a
    /// generic 500 by the time it reaches the route layer.
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<NexusError>() {
            Ok(nexus_err) => nexus_err,
            Err(err) => NexusError::Internal(err),
        }
    }
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl NexusError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyExists { .. } => StatusCode::CONFLICT,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for NexusError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients.
        let message = match &self {
            NexusError::Database(e) => {
                tracing::error!("database error: {e}");
                "An internal error occurred".to_string()
            }
            NexusError::Redis(e) => {
                tracing::error!("redis error: {e}");
                "An internal error occurred".to_string()
            }
            NexusError::Internal(e) => {
                tracing::error!("internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let retry_after_ms = if let NexusError::RateLimited { retry_after_ms } = &self {
            Some(*retry_after_ms)
        } else {
            None
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
            retry_after_ms,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using NexusError.
pub type NexusResult<T> = Result<T, NexusError>;
