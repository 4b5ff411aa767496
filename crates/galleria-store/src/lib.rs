//! # Galleria Store
//!
//! Storage abstraction for the archiver. Provides a trait-based interface
//! for item, watermark, owner and blob persistence with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The sync engine talks to storage only through the [`Store`] and
//! [`BlobStore`] traits. The primary implementation is [`SqliteStore`],
//! with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for archive persistence
//! - [`BlobStore`] - Content-addressed binary assets
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`PageCommit`] - One page's changes plus its watermark, applied atomically
//! - [`PassCompletion`] - Final watermark of a pass plus the removal sweep
//!
//! ## Usage
//!
//! ```rust,no_run
//! use galleria_core::CollectionType;
//! use galleria_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("archive.db").unwrap();
//!     let wm = store.get_watermark("alice", CollectionType::Gallery).await.unwrap();
//!     println!("{} pages synced", wm.last_synced_page);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Atomic pages**: a page's items and its watermark land together or not at all
//! - **Two-phase removal**: candidates are marked up front and swept at pass end
//! - **Dedupe by content**: blobs are keyed by their Blake3 hash

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryBlobStore, MemoryStore};
pub use sqlite::SqliteStore;
pub use traits::{BlobStore, PageCommit, PassCompletion, Store, StoreExt};
