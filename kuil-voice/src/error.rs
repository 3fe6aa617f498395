//! Error types for kuil-voice
//!
//! Domain taxonomy:
//! - `GatewayError`: LLM call failed or timed out; retried on the next scheduled cycle
//! - `InsufficientData`: regression or session underdetermined; callers fall back to defaults
//! - `SessionStateError`: operation invalid for the current calibration session

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub use crate::services::llm_gateway::GatewayError;

/// Calibration session state violations, surfaced to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionStateError {
    #[error("No calibration session is active")]
    NotStarted,

    #[error("Calibration session is already complete")]
    AlreadyComplete,

    #[error("Calibration session is incomplete ({recorded} of {target} swipes)")]
    Incomplete { recorded: usize, target: usize },
}

/// Errors from the calibration and evolution services
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Session state error: {0}")]
    SessionState(#[from] SessionStateError),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Common(#[from] kuil_common::Error),
}

impl From<sqlx::Error> for CalibrationError {
    fn from(err: sqlx::Error) -> Self {
        CalibrationError::Common(kuil_common::Error::Database(err))
    }
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - operation invalid for current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream LLM Gateway unavailable (502)
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// kuil-common error
    #[error("Common error: {0}")]
    Common(#[from] kuil_common::Error),
}

impl From<CalibrationError> for ApiError {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::SessionState(e) => ApiError::Conflict(e.to_string()),
            CalibrationError::InsufficientData(msg) => ApiError::BadRequest(msg),
            CalibrationError::Gateway(e) => ApiError::Upstream(e.to_string()),
            CalibrationError::Common(kuil_common::Error::NotFound(msg)) => ApiError::NotFound(msg),
            CalibrationError::Common(kuil_common::Error::InvalidInput(msg)) => {
                ApiError::BadRequest(msg)
            }
            CalibrationError::Common(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(kuil_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(kuil_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
