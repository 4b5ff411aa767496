//! Error types for the sync module.
//!
//! Every failure maps to a [`FailureClass`], which is all the scheduler
//! looks at when deciding between retry, abort and halting an owner.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use galleria_core::{ItemId, ParseError};
use galleria_store::StoreError;

/// Network-level failures reported by a [`crate::Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within the per-request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection could not be established or was reset.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The remote reports the account as disabled or closed.
    #[error("account disabled: {0}")]
    AccountDisabled(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Status(code) => *code == 429 || (500..600).contains(code),
            TransportError::AccountDisabled(_) => false,
        }
    }
}

/// How the scheduler treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Retry with backoff.
    Transient,
    /// Terminal for the job; not retried.
    Permanent,
    /// Terminal for every job of the owner.
    HaltOwner,
    /// Persistence failed; the job is retried on the next run.
    StoreFailure,
    /// The run was cancelled.
    Cancelled,
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A page could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The requested page does not exist.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The session was rejected for this owner's pages.
    #[error("authorization rejected for {owner} (status {status})")]
    Authorization { owner: String, status: u16 },

    /// The owner's account is disabled upstream.
    #[error("account {owner} is disabled")]
    AccountDisabled { owner: String },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An item could not be reconciled.
    #[error("item {id}: {source}")]
    Item {
        id: ItemId,
        #[source]
        source: Box<SyncError>,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Classify a transport failure of a request made for `owner`.
    pub fn from_transport(owner: &str, url: &str, error: TransportError) -> Self {
        match error {
            TransportError::Status(404) | TransportError::Status(410) => SyncError::NotFound {
                url: url.to_string(),
            },
            TransportError::Status(status @ (401 | 403)) => SyncError::Authorization {
                owner: owner.to_string(),
                status,
            },
            TransportError::AccountDisabled(_) => SyncError::AccountDisabled {
                owner: owner.to_string(),
            },
            other => SyncError::Transport(other),
        }
    }

    /// Attach the item this error occurred on.
    pub fn for_item(self, id: ItemId) -> Self {
        match self {
            SyncError::Cancelled => SyncError::Cancelled,
            other => SyncError::Item {
                id,
                source: Box::new(other),
            },
        }
    }

    /// The scheduler-facing class of this error.
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::Transport(e) if e.is_transient() => FailureClass::Transient,
            SyncError::Transport(_) => FailureClass::Permanent,
            SyncError::Parse(_) | SyncError::NotFound { .. } => FailureClass::Permanent,
            SyncError::Authorization { .. } | SyncError::AccountDisabled { .. } => {
                FailureClass::HaltOwner
            }
            SyncError::Store(_) => FailureClass::StoreFailure,
            SyncError::Item { source, .. } => source.class(),
            SyncError::Cancelled => FailureClass::Cancelled,
        }
    }

    /// Whether this error means the owner's account is disabled upstream.
    pub fn is_account_disabled(&self) -> bool {
        match self {
            SyncError::AccountDisabled { .. } => true,
            SyncError::Item { source, .. } => source.is_account_disabled(),
            _ => false,
        }
    }
}

/// A listing page could not be produced.
#[derive(Debug, Error)]
#[error("page {page}: {error}")]
pub struct PageFetchError {
    /// 1-indexed page ordinal within the traversal.
    pub page: u32,
    #[source]
    pub error: SyncError,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_core::CollectionType;

    #[test]
    fn test_transport_classes() {
        let url = "https://site.test/view/1/";
        let class = |e| SyncError::from_transport("alice", url, e).class();

        assert_eq!(class(TransportError::Timeout(Duration::from_secs(1))), FailureClass::Transient);
        assert_eq!(class(TransportError::Status(503)), FailureClass::Transient);
        assert_eq!(class(TransportError::Status(429)), FailureClass::Transient);
        assert_eq!(class(TransportError::Status(404)), FailureClass::Permanent);
        assert_eq!(class(TransportError::Status(400)), FailureClass::Permanent);
        assert_eq!(class(TransportError::Status(403)), FailureClass::HaltOwner);
        assert_eq!(
            class(TransportError::AccountDisabled("closed".into())),
            FailureClass::HaltOwner
        );
    }

    #[test]
    fn test_item_errors_keep_source_class() {
        let err = SyncError::Transport(TransportError::Status(502)).for_item(ItemId::from("1004"));
        assert_eq!(err.class(), FailureClass::Transient);
        assert!(err.to_string().contains("1004"));

        let parse = SyncError::from(ParseError::detail(CollectionType::Gallery, "no title"))
            .for_item(ItemId::from("9"));
        assert_eq!(parse.class(), FailureClass::Permanent);
    }

    #[test]
    fn test_cancellation_is_not_wrapped() {
        let err = SyncError::Cancelled.for_item(ItemId::from("1"));
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[test]
    fn test_account_disabled_through_item() {
        let err = SyncError::AccountDisabled {
            owner: "alice".into(),
        }
        .for_item(ItemId::from("3"));
        assert!(err.is_account_disabled());
        assert_eq!(err.class(), FailureClass::HaltOwner);
    }
}
