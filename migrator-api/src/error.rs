//! API Error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use migrator_core::MigratorError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Migration error: {0}")]
    Migrator(#[from] MigratorError),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Migrator(e) => match e {
                MigratorError::UnknownMint(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_MINT"),
                MigratorError::InvalidTransition { .. } | MigratorError::InvalidState { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_TRANSITION")
                }
                MigratorError::InvalidStep(_) => (StatusCode::BAD_REQUEST, "INVALID_STEP"),
                MigratorError::LockContended(_) => (StatusCode::CONFLICT, "LOCK_CONTENDED"),
                MigratorError::StatusConflict { .. } => (StatusCode::CONFLICT, "STATUS_CONFLICT"),
                MigratorError::StoreUnavailable(_) | MigratorError::LockUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "MIGRATOR_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_core::TokenStatus;

    #[test]
    fn test_migrator_error_status_codes() {
        let cases = [
            (MigratorError::UnknownMint("M".into()), StatusCode::BAD_REQUEST),
            (
                MigratorError::InvalidTransition {
                    from: TokenStatus::Active,
                    to: TokenStatus::Migrated,
                },
                StatusCode::BAD_REQUEST,
            ),
            (MigratorError::LockContended("M".into()), StatusCode::CONFLICT),
            (
                MigratorError::StoreUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                MigratorError::Serialization("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_and_code().0, expected);
        }
    }
}
