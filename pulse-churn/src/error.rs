//! Error types for pulse-churn
//!
//! Validation errors surface synchronously with a JSON error envelope.
//! Background-stage failures are never thrown to an open connection; they are
//! recorded in job state and discovered via polling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unparseable or incomplete input (400)
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Feature processing already in flight for this dataset/org (409)
    #[error("Already processing: {0}")]
    AlreadyProcessing(String),

    /// A training job for this organization is still queued or running (409)
    #[error("Training already in progress for this organization")]
    TrainingInProgress,

    /// Dependent operation attempted before features are ready (409)
    #[error("Feature set not ready: {0}")]
    FeatureSetNotReady(String),

    /// Prediction attempted with no current trained model (404)
    #[error("No trained model: {0}")]
    ModelNotFound(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// pulse-common error
    #[error("Common error: {0}")]
    Common(#[from] pulse_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::InvalidFormat(msg) => (StatusCode::BAD_REQUEST, "INVALID_FORMAT", msg),
            ApiError::AlreadyProcessing(msg) => (StatusCode::CONFLICT, "ALREADY_PROCESSING", msg),
            ApiError::TrainingInProgress => (
                StatusCode::CONFLICT,
                "TRAINING_IN_PROGRESS",
                "A training job is already queued or running for this organization".to_string(),
            ),
            ApiError::FeatureSetNotReady(msg) => {
                (StatusCode::CONFLICT, "FEATURE_SET_NOT_READY", msg)
            }
            ApiError::ModelNotFound(msg) => (StatusCode::NOT_FOUND, "MODEL_NOT_FOUND", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(pulse_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(pulse_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_FORMAT", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

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
