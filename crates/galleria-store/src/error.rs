//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Column serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backend could not be reached (poisoned lock, blocking task lost).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<galleria_core::CoreError> for StoreError {
    fn from(e: galleria_core::CoreError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
