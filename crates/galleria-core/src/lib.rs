//! # Galleria Core
//!
//! Pure types for the Galleria archiver: items, collections, watermarks,
//! pagination cursors, and revision hashing.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Item`] - An archived unit (submission, journal, favorite link)
//! - [`ItemSummary`] - The cheap listing-level view of an item
//! - [`DetailRecord`] - The full detail of an item, as extracted from its page
//! - [`RevisionHash`] - Fingerprint of an item's mutable fields
//! - [`CollectionWatermark`] - Per-collection synchronization checkpoint
//! - [`CursorState`] - Serializable, restartable pagination position
//! - [`SyncOutcome`] - What happened to one item during a pass
//!
//! ## Revision Hashing
//!
//! Revision hashes are Blake3 over a canonical CBOR encoding of the tracked
//! fields. See [`revision`].

pub mod cursor;
pub mod error;
pub mod item;
pub mod outcome;
pub mod revision;
pub mod types;
pub mod watermark;

pub use cursor::{CursorState, PageToken};
pub use error::{CoreError, ParseError};
pub use item::{normalize_tags, DetailRecord, Item, ItemStatus, ItemSummary, ListingPage};
pub use outcome::{OutcomeTally, SyncOutcome};
pub use revision::RevisionHash;
pub use types::{BlobId, CollectionType, ItemId, Owner};
pub use watermark::{CollectionWatermark, PassCheckpoint, PassMode};

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
