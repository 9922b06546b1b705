//! CLI Error Types

use migrator_core::MigratorError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("API request failed: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error(transparent)]
    Migrator(#[from] MigratorError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        CliError::ConfigError {
            message: message.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        CliError::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigError { .. } => 2,
            CliError::Migrator(e) if e.is_unavailable() => 3,
            CliError::ApiError { status: 404, .. } => 4,
            _ => 1,
        }
    }
}
