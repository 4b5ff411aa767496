//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use galleria_core::CollectionType;
use galleria_store::{MemoryBlobStore, MemoryStore};
use galleria_sync::{
    CollectionSyncPlanner, PassFailure, PassReport, RateLimitConfig, RetryPolicy,
    SchedulerConfig, SyncConfig, SyncContext, SyncScheduler,
};

use crate::site::FakeSite;

/// Scheduler settings for tests: no rate limit, millisecond backoff
/// without jitter, three retries.
pub fn fast_scheduler_config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        rate_limit: RateLimitConfig::unlimited(),
        retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 3)
            .with_jitter(false),
    }
}

/// A fake site wired to in-memory stores.
pub struct TestFixture {
    pub site: Arc<FakeSite>,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub config: SyncConfig,
}

impl TestFixture {
    /// Create a fixture whose site serves `page_size` entries per page.
    pub fn new(page_size: usize) -> Self {
        Self::with_site(FakeSite::new(page_size))
    }

    pub fn with_site(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            config: SyncConfig::default(),
        }
    }

    /// Replace the pass configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// A sync context over the fixture's site and stores.
    pub fn context(&self) -> SyncContext {
        SyncContext::builder()
            .store(self.store.clone())
            .blobs(self.blobs.clone())
            .fetcher(self.site.clone())
            .endpoints(self.site.endpoints())
            .config(self.config.clone())
            .build()
            .expect("fixture context is complete")
    }

    pub fn planner(&self) -> Arc<CollectionSyncPlanner> {
        Arc::new(CollectionSyncPlanner::new(Arc::new(self.context())))
    }

    /// A scheduler with [`fast_scheduler_config`].
    pub fn scheduler(&self, workers: usize) -> SyncScheduler {
        SyncScheduler::new(self.planner(), fast_scheduler_config(workers))
    }

    /// Run one pass in its default mode.
    pub async fn pass(&self, owner: &str, collection: CollectionType) -> Result<PassReport, PassFailure> {
        self.planner()
            .run(owner, collection, false, CancellationToken::new())
            .await
    }

    /// Run one forced full pass.
    pub async fn full_pass(&self, owner: &str, collection: CollectionType) -> Result<PassReport, PassFailure> {
        self.planner()
            .run(owner, collection, true, CancellationToken::new())
            .await
    }
}
