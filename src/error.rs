//! Error handling for camhub

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate entity (row, session, job)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Request validation failed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// ONVIF authentication rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network peer unreachable
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Protocol-level failure (SOAP fault, malformed reply)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Child process exited abnormally or could not be spawned
    #[error("Process failed: {0}")]
    ProcessFailed(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Resource busy or referenced by live state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Unreachable(e.to_string())
        } else {
            Error::Protocol(e.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::AlreadyExists(msg) => (StatusCode::CONFLICT, "ALREADY_EXISTS", msg.clone()),
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            Error::Unreachable(msg) => (StatusCode::BAD_GATEWAY, "UNREACHABLE", msg.clone()),
            Error::Protocol(msg) => (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR", msg.clone()),
            Error::ProcessFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESS_FAILED",
                msg.clone(),
            ),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
