//! API error type with consistent JSON responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::engine::EngineError;

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    /// Status and stable error code clients can branch on.
    pub fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Engine(e) => match e {
                EngineError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                EngineError::InvalidTimeInput(_) => (StatusCode::BAD_REQUEST, "invalid_time"),
                EngineError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, "limit_exceeded"),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                EngineError::SlotAlreadyTaken { .. } => (StatusCode::CONFLICT, "slot_taken"),
                EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.parts();
        let details = match &self {
            ApiError::Unauthorized => None,
            ApiError::BadRequest(msg) => Some(msg.clone()),
            ApiError::Engine(EngineError::SlotAlreadyTaken { conflicting }) => {
                tracing::debug!(%conflicting, "reservation lost to existing booking");
                Some("That time was just taken, please pick another time.".to_string())
            }
            ApiError::Engine(EngineError::Storage(msg)) => {
                tracing::error!(error = %msg, "Storage error");
                None
            }
            ApiError::Engine(e) => Some(e.to_string()),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, ApiError>;
