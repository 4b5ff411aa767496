//! # Galleria Sync
//!
//! Incremental synchronization of remote gallery collections into a local
//! store.
//!
//! ## Overview
//!
//! Work flows top-down through four layers:
//!
//! - [`SyncScheduler`] orders jobs across owners, bounds concurrency and
//!   retries transient failures
//! - [`CollectionSyncPlanner`] runs one pass over one (owner, collection)
//!   pair and decides when to stop
//! - [`PageCursor`] walks the remote listing page by page
//! - [`ItemSynchronizer`] reconciles one listing entry with its stored record
//!
//! All requests go through a [`FetchGateway`], which waits on the shared
//! [`RateLimiter`], applies the request timeout and classifies failures.
//!
//! ## Key Properties
//!
//! - **Idempotent**: replaying a pass over unchanged content writes nothing
//! - **Resumable**: an interrupted pass continues from its last committed page
//! - **Bounded**: incremental passes stop shortly after reaching known items
//! - **Two-phase removal**: only a completed full pass marks items removed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use galleria_core::CollectionType;
//! use galleria_sync::{CollectionSyncPlanner, SchedulerConfig, SyncContext, SyncJob, SyncScheduler};
//!
//! async fn example(ctx: SyncContext) {
//!     let planner = Arc::new(CollectionSyncPlanner::new(Arc::new(ctx)));
//!     let mut scheduler = SyncScheduler::new(planner, SchedulerConfig::default());
//!     scheduler.submit(SyncJob::new("alice", CollectionType::Gallery));
//!
//!     let report = scheduler.run().await;
//!     println!("{} items written", report.totals().written());
//! }
//! ```
//!
//! ## Pass Flow
//!
//! ```text
//! scheduler ── job ──> planner ── next() ──> cursor ── GET listing
//!                        │
//!                        ├── reconcile(entry) ──> synchronizer ── GET detail, assets
//!                        │
//!                        └── commit_page(items + checkpoint) ──> store
//! ```

pub mod config;
pub mod context;
pub mod cursor;
pub mod endpoints;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod planner;
pub mod rate_limit;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

pub use config::SyncConfig;
pub use context::{ContextError, SyncContext, SyncContextBuilder};
pub use cursor::{FetchedPage, PageCursor};
pub use endpoints::{DefaultEndpoints, Endpoints};
pub use error::{FailureClass, PageFetchError, Result, SyncError, TransportError};
pub use extractor::{JsonExtractor, PageExtractor};
pub use fetch::{Credentials, FetchGateway, Fetcher};
pub use planner::{CollectionSyncPlanner, PassEnd, PassFailure, PassReport};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use reconcile::{
    AssetErrors, ItemSynchronizer, MarkerComparator, Reconciliation, SurrogateComparator,
    SurrogateMatch, UnknownSurrogate,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    HaltReason, JobReport, JobStatus, SchedulerConfig, SchedulerReport, StopLocation, SyncJob,
    SyncScheduler,
};
