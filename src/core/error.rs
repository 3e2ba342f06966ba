//! Error types and handling for the relay.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and implements HTTP response conversion. Rendered bodies never carry the
//! internal detail of the error; that goes to the log only.

use crate::core::error_types::{
    ERROR_TYPE_API, ERROR_TYPE_INVALID_REQUEST, ERROR_TYPE_SERVER, MESSAGE_PARSE_FAILED,
    MESSAGE_UPSTREAM_UNAVAILABLE,
};
use crate::transformer::Dialect;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (missing or malformed env values)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Transport-level failure talking to the upstream (connect, TLS, read)
    #[error("Upstream transport error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Forward was called before the upstream target was configured
    #[error("Upstream not configured")]
    NotConfigured,

    /// The upstream body could not be decoded as a whole
    #[error("Failed to parse upstream response: {0}")]
    ParseResponse(String),

    /// A single SSE line exceeded the reader ceiling
    #[error("Upstream stream line exceeded {0} bytes")]
    StreamLineTooLong(usize),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Status code and externally safe message for this error.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Upstream(_) | AppError::StreamLineTooLong(_) => (
                StatusCode::BAD_GATEWAY,
                MESSAGE_UPSTREAM_UNAVAILABLE.to_string(),
            ),
            AppError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                MESSAGE_UPSTREAM_UNAVAILABLE.to_string(),
            ),
            AppError::ParseResponse(_) => {
                (StatusCode::BAD_GATEWAY, MESSAGE_PARSE_FAILED.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => ERROR_TYPE_INVALID_REQUEST,
            AppError::Upstream(_) | AppError::NotConfigured | AppError::StreamLineTooLong(_) => {
                ERROR_TYPE_SERVER
            }
            _ => ERROR_TYPE_API,
        }
    }

    /// Render the error body in the shape the caller's dialect expects.
    pub fn to_dialect_body(&self, dialect: Dialect) -> (StatusCode, Value) {
        let (status, message) = self.status_and_message();
        let body = match dialect {
            Dialect::Messages => json!({
                "type": "error",
                "error": {
                    "type": if self.error_type() == ERROR_TYPE_SERVER { ERROR_TYPE_API } else { self.error_type() },
                    "message": message
                }
            }),
            Dialect::ChatCompletions | Dialect::Responses => json!({
                "error": {
                    "message": message,
                    "type": self.error_type(),
                    "code": Value::Null
                }
            }),
        };
        (status, body)
    }

    /// Convert into an HTTP response rendered for `dialect`.
    pub fn into_dialect_response(self, dialect: Dialect) -> Response {
        self.log();
        let (status, body) = self.to_dialect_body(dialect);
        (status, Json(body)).into_response()
    }

    fn log(&self) {
        match self {
            AppError::BadRequest(msg) => tracing::debug!(error = %msg, "Rejected request"),
            AppError::Upstream(e) => tracing::error!(
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "Upstream transport failure"
            ),
            other => tracing::error!(error = %other, "Request failed"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_dialect_response(Dialect::ChatCompletions)
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
