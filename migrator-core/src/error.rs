//! Migrator Error Types
//!
//! Error definitions for the migration coordinator. Failures reported by the
//! external workflow steps are not errors at this level; they are carried by
//! [`crate::steps::StepError`] and folded into an advance outcome.

use thiserror::Error;

use crate::types::TokenStatus;

/// Migrator Error
#[derive(Error, Debug)]
pub enum MigratorError {
    /// The token store could not be reached
    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    /// The token store rejected or failed an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// The shared lock store could not be reached
    #[error("Lock service unavailable: {0}")]
    LockUnavailable(String),

    /// No record exists for the mint
    #[error("Unknown mint: {0}")]
    UnknownMint(String),

    /// A record for the mint already exists
    #[error("Mint already registered: {0}")]
    AlreadyRegistered(String),

    /// The requested status change is not an edge of the state graph
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TokenStatus, to: TokenStatus },

    /// The record is not in a status the operation accepts
    #[error("Invalid state for {operation}: status is {status}")]
    InvalidState {
        operation: &'static str,
        status: TokenStatus,
    },

    /// A compare-and-set guard did not match the stored status
    #[error("Status changed concurrently: expected {expected}, found {found}")]
    StatusConflict {
        expected: TokenStatus,
        found: TokenStatus,
    },

    /// Another attempt currently holds the lock for the mint
    #[error("Migration lock held by another owner: {0}")]
    LockContended(String),

    /// A stored status string is not a known lifecycle value
    #[error("Unrecognized token status: {0}")]
    UnknownStatus(String),

    /// A stored progress blob has a version this build does not understand
    #[error("Unsupported migration progress version {found} (expected {expected})")]
    UnsupportedProgressVersion { found: u32, expected: u32 },

    /// The reported step is not acceptable for the record's progress
    #[error("Invalid step report: {0}")]
    InvalidStep(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Event transport error
    #[error("Event bus error: {0}")]
    EventBus(String),
}

impl MigratorError {
    /// Whether the error means the coordinator must stop touching shared state
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            MigratorError::StoreUnavailable(_) | MigratorError::LockUnavailable(_)
        )
    }
}

/// Migrator Result type
pub type MigratorResult<T> = Result<T, MigratorError>;

impl From<serde_json::Error> for MigratorError {
    fn from(e: serde_json::Error) -> Self {
        MigratorError::Serialization(e.to_string())
    }
}

impl From<sled::Error> for MigratorError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => MigratorError::StoreUnavailable(io.to_string()),
            other => MigratorError::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for MigratorError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() {
            MigratorError::LockUnavailable(e.to_string())
        } else {
            MigratorError::EventBus(e.to_string())
        }
    }
}
