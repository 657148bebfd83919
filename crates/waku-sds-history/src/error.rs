//! Error types for local history.

use thiserror::Error;

use waku_sds_core::ValidationError;

/// Errors that can occur during history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A message in the batch failed validation; nothing was stored.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Causal history serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
