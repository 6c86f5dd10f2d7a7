use crate::services::error::DriveError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let status = match &err {
            DriveError::NotFound(_) => StatusCode::NOT_FOUND,
            DriveError::NameConflict { .. } | DriveError::CycleDetected { .. } => {
                StatusCode::CONFLICT
            }
            DriveError::CrossOwnerForbidden(_) | DriveError::RootImmutable => {
                StatusCode::FORBIDDEN
            }
            DriveError::InvalidName { .. } | DriveError::InvalidExpiry(_) => {
                StatusCode::BAD_REQUEST
            }
            DriveError::Expired => StatusCode::GONE,
            DriveError::StorageIo(_) => StatusCode::BAD_GATEWAY,
            DriveError::InvariantViolation(_) | DriveError::Sqlx(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
            // Database details stay in the log.
            if matches!(err, DriveError::Sqlx(_)) {
                return AppError::internal("internal database error");
            }
        }
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
