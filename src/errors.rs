use crate::services::{registry::RegistryError, upload_service::UploadError};
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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing user identity")
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

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Unauthenticated => AppError::unauthenticated(),
            UploadError::BadRequest(_)
            | UploadError::UnsupportedType { .. }
            | UploadError::ContentMismatch { .. }
            | UploadError::TooLarge { .. }
            | UploadError::BodyRead(_) => {
                tracing::debug!("upload rejected: {}", err);
                AppError::bad_request(err.to_string())
            }
            UploadError::Timeout => {
                tracing::warn!("upload aborted: {}", err);
                AppError::new(StatusCode::REQUEST_TIMEOUT, err.to_string())
            }
            UploadError::Registry(inner) => inner.into(),
            UploadError::Io(inner) => {
                tracing::error!("storage I/O failed during upload: {}", inner);
                AppError::internal("failed to store file")
            }
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound => AppError::not_found("file not found"),
            RegistryError::Forbidden => AppError::new(StatusCode::FORBIDDEN, "forbidden"),
            RegistryError::Conflict(_) => {
                tracing::error!("file registry invariant violated: {}", err);
                AppError::internal("failed to store file")
            }
        }
    }
}
