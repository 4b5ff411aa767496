//! Error types for the archive facade.

use galleria_core::{CollectionType, CoreError};
use galleria_store::StoreError;
use galleria_sync::{ContextError, SyncError};
use thiserror::Error;

/// Errors that can occur during archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid core value, such as an unknown collection name.
    #[error("invalid value: {0}")]
    Core(#[from] CoreError),

    /// The sync context could not be assembled.
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Owner is not registered.
    #[error("unknown owner: {0}")]
    UnknownOwner(String),

    /// Owner registered without any collection to mirror.
    #[error("owner {0} has no collections")]
    NoCollections(String),

    /// Items of this collection cannot be fetched by id.
    #[error("{0} items cannot be fetched by id")]
    NotFetchableById(CollectionType),
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
