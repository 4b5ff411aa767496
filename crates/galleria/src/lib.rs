//! # Galleria
//!
//! Incremental archiving of user-curated gallery sites into a local
//! database.
//!
//! ## Overview
//!
//! Galleria mirrors the galleries, scraps, favorites and journals of many
//! remote accounts:
//!
//! - **Items**: every submission, journal and favorite link is stored once
//! - **Incremental updates**: repeated runs fetch only new or edited content
//! - **Removal detection**: full passes mark items deleted upstream
//! - **Crash safety**: an interrupted run resumes from its last committed page
//!
//! ## Key Concepts
//!
//! - **Owner**: a registered remote account and the collections to mirror
//! - **Watermark**: per-collection record of how far the last pass got
//! - **Full pass**: a walk over an entire collection
//! - **Incremental pass**: a walk that stops once it reaches known items
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use galleria::{Archive, ArchiveConfig, UpdateRequest};
//! use galleria::core::CollectionType;
//! use galleria::sync::Fetcher;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example(fetcher: Arc<dyn Fetcher>) -> galleria::Result<()> {
//!     let config = ArchiveConfig::load("archive.json")?;
//!     let archive = Archive::open("archive.db", fetcher, config)?;
//!
//!     archive
//!         .add_owner("alice", [CollectionType::Gallery, CollectionType::Favorites])
//!         .await?;
//!
//!     let report = archive
//!         .update(&UpdateRequest::all(), CancellationToken::new())
//!         .await?;
//!     println!("{} items written", report.totals().written());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `galleria::core` - Core types (Item, CollectionType, watermarks)
//! - `galleria::store` - Storage abstraction and SQLite
//! - `galleria::sync` - Cursor, synchronizer, planner and scheduler

pub mod archive;
pub mod config;
pub mod error;

// Re-export component crates
pub use galleria_core as core;
pub use galleria_store as store;
pub use galleria_sync as sync;

// Re-export main types for convenience
pub use archive::{Archive, UpdateRequest};
pub use config::{ArchiveConfig, DEFAULT_BASE_URL};
pub use error::{ArchiveError, Result};

// Re-export commonly used types
pub use galleria_core::{CollectionType, Item, ItemId, ItemStatus, Owner, SyncOutcome};
pub use galleria_sync::{JobReport, JobStatus, SchedulerReport, SyncJob};
