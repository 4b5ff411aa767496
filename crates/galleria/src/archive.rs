//! The Archive: owner registry plus update runs.
//!
//! An [`Archive`] ties a store, a blob store and a fetcher together. It
//! keeps the list of mirrored owners, turns an [`UpdateRequest`] into
//! scheduler jobs and runs them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use galleria_core::{CollectionType, CollectionWatermark, Item, ItemId, OutcomeTally, Owner};
use galleria_store::{BlobStore, SqliteStore, Store, StoreExt};
use galleria_sync::{
    CollectionSyncPlanner, DefaultEndpoints, Fetcher, HaltReason, RateLimiter, SchedulerReport,
    SyncContext, SyncJob, SyncScheduler,
};

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};

/// Which owners and collections an update visits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    /// Owners to update. Empty means every registered owner.
    pub owners: Vec<String>,
    /// Restrict to these collections. `None` means each owner's own set.
    pub collections: Option<BTreeSet<CollectionType>>,
    /// Also update owners marked inactive.
    pub include_deactivated: bool,
    /// Run full passes, which also detect removals.
    pub force_full: bool,
    pub priority: u8,
}

impl UpdateRequest {
    /// Update every active owner.
    pub fn all() -> Self {
        Self::default()
    }

    /// Update only the named owners.
    pub fn owners<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn collections(mut self, collections: impl IntoIterator<Item = CollectionType>) -> Self {
        self.collections = Some(collections.into_iter().collect());
        self
    }

    #[must_use]
    pub fn full(mut self) -> Self {
        self.force_full = true;
        self
    }

    #[must_use]
    pub fn include_deactivated(mut self) -> Self {
        self.include_deactivated = true;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// The main Archive struct.
///
/// Provides a unified API for:
/// - Registering, deactivating and listing owners
/// - Planning and running updates
/// - Reading archived items and watermarks
pub struct Archive {
    store: Arc<dyn Store>,
    planner: Arc<CollectionSyncPlanner>,
    config: ArchiveConfig,
}

impl Archive {
    /// Create an archive over the given collaborators.
    ///
    /// URLs are built on `config.base_url` and every request shares one
    /// limiter built from `config.scheduler.rate_limit`.
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn Fetcher>,
        config: ArchiveConfig,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(&config.scheduler.rate_limit));
        let ctx = SyncContext::builder()
            .store(store)
            .blobs(blobs)
            .fetcher(fetcher)
            .limiter(limiter)
            .credentials(config.credentials.clone())
            .endpoints(DefaultEndpoints::new(config.base_url.clone()))
            .config(config.sync.clone())
            .build()?;
        Ok(Self::with_context(ctx, config))
    }

    /// Open (or create) a SQLite archive that also holds the blobs.
    pub fn open(path: impl AsRef<Path>, fetcher: Arc<dyn Fetcher>, config: ArchiveConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(path)?);
        Self::new(store.clone(), store, fetcher, config)
    }

    /// Create an archive from a prepared context, for custom endpoints,
    /// extractors or comparators.
    ///
    /// `config.sync` and `config.credentials` are ignored; the context
    /// already carries them.
    pub fn with_context(ctx: SyncContext, config: ArchiveConfig) -> Self {
        let store = ctx.store.clone();
        Self {
            store,
            planner: Arc::new(CollectionSyncPlanner::new(Arc::new(ctx))),
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Owner Registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register an owner, or add collections to an existing one.
    ///
    /// The active flag of an existing owner is left as it is.
    pub async fn add_owner(
        &self,
        handle: &str,
        collections: impl IntoIterator<Item = CollectionType>,
    ) -> Result<Owner> {
        let handle = handle.trim();
        let mut owner = match self.store.get_owner(handle).await? {
            Some(existing) => existing,
            None => Owner {
                handle: handle.to_string(),
                collections: BTreeSet::new(),
                active: true,
            },
        };
        owner.collections.extend(collections);
        if owner.collections.is_empty() {
            return Err(ArchiveError::NoCollections(handle.to_string()));
        }

        self.store.upsert_owner(&owner).await?;
        tracing::info!(owner = %owner.handle, collections = owner.collections.len(), "owner registered");
        Ok(owner)
    }

    /// Stop mirroring some collections of an owner. The archived items
    /// stay in the store.
    pub async fn remove_collections(
        &self,
        handle: &str,
        collections: impl IntoIterator<Item = CollectionType>,
    ) -> Result<Owner> {
        let mut owner = self.owner(handle).await?;
        for collection in collections {
            owner.collections.remove(&collection);
        }
        self.store.upsert_owner(&owner).await?;
        Ok(owner)
    }

    pub async fn owner(&self, handle: &str) -> Result<Owner> {
        self.store
            .get_owner(handle)
            .await?
            .ok_or_else(|| ArchiveError::UnknownOwner(handle.to_string()))
    }

    /// All registered owners, ordered by handle.
    pub async fn owners(&self) -> Result<Vec<Owner>> {
        Ok(self.store.list_owners().await?)
    }

    /// Skip an owner on later updates unless explicitly included.
    pub async fn deactivate_owner(&self, handle: &str) -> Result<()> {
        self.set_active(handle, false).await
    }

    pub async fn activate_owner(&self, handle: &str) -> Result<()> {
        self.set_active(handle, true).await
    }

    async fn set_active(&self, handle: &str, active: bool) -> Result<()> {
        if !self.store.set_owner_active(handle, active).await? {
            return Err(ArchiveError::UnknownOwner(handle.to_string()));
        }
        tracing::info!(owner = handle, active, "owner status changed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Updates
    // ─────────────────────────────────────────────────────────────────────────

    /// The jobs an update would run, in owner then collection order.
    pub async fn work_list(&self, request: &UpdateRequest) -> Result<Vec<SyncJob>> {
        let owners = if request.owners.is_empty() {
            self.store.list_owners().await?
        } else {
            let mut owners = Vec::with_capacity(request.owners.len());
            for handle in &request.owners {
                owners.push(self.owner(handle).await?);
            }
            owners
        };

        let mut jobs = Vec::new();
        for owner in owners {
            if !owner.active && !request.include_deactivated {
                tracing::debug!(owner = %owner.handle, "skipping deactivated owner");
                continue;
            }
            for collection in &owner.collections {
                if let Some(filter) = &request.collections {
                    if !filter.contains(collection) {
                        continue;
                    }
                }
                jobs.push(SyncJob {
                    owner: owner.handle.clone(),
                    collection: *collection,
                    priority: request.priority,
                    force_full: request.force_full,
                });
            }
        }
        Ok(jobs)
    }

    /// Run an update to completion or until `cancel` fires.
    ///
    /// Owners whose account turns out to be disabled upstream are
    /// deactivated.
    pub async fn update(&self, request: &UpdateRequest, cancel: CancellationToken) -> Result<SchedulerReport> {
        let jobs = self.work_list(request).await?;
        tracing::info!(jobs = jobs.len(), full = request.force_full, "update started");

        let mut scheduler = SyncScheduler::new(self.planner.clone(), self.config.scheduler.clone())
            .with_cancellation(cancel);
        for job in jobs {
            scheduler.submit(job);
        }
        let report = scheduler.run().await;

        if !self.planner.context().config.dry_run {
            for (owner, reason) in &report.halted_owners {
                if *reason == HaltReason::AccountDisabled {
                    tracing::warn!(owner = %owner, "account disabled upstream, deactivating");
                    self.store.set_owner_active(owner, false).await?;
                }
            }
        }

        Ok(report)
    }

    /// Download specific submissions or journals by id into an owner's
    /// collection.
    ///
    /// Ids already stored are skipped unless `replace` is set. Favorites
    /// are links rather than items of their own and are refused.
    pub async fn fetch_items<I, S>(
        &self,
        owner: &str,
        collection: CollectionType,
        ids: I,
        replace: bool,
        cancel: CancellationToken,
    ) -> Result<OutcomeTally>
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        if collection == CollectionType::Favorites {
            return Err(ArchiveError::NotFetchableById(collection));
        }
        let ids: Vec<ItemId> = ids.into_iter().map(Into::into).collect();
        Ok(self
            .planner
            .fetch_items(owner, collection, &ids, replace, cancel)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Active items of one collection, sorted by id.
    pub async fn items(&self, owner: &str, collection: CollectionType) -> Result<Vec<Item>> {
        Ok(self.store.active_items(owner, collection).await?)
    }

    pub async fn watermark(&self, owner: &str, collection: CollectionType) -> Result<CollectionWatermark> {
        Ok(self.store.get_watermark(owner, collection).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_store::{MemoryBlobStore, MemoryStore};
    use galleria_testkit::FakeSite;

    fn archive() -> Archive {
        Archive::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(FakeSite::new(10)),
            ArchiveConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_owner_merges_collections() {
        let archive = archive();
        archive.add_owner("alice", [CollectionType::Gallery]).await.unwrap();
        let owner = archive
            .add_owner("alice", [CollectionType::Favorites])
            .await
            .unwrap();

        assert_eq!(
            owner.collections.into_iter().collect::<Vec<_>>(),
            vec![CollectionType::Gallery, CollectionType::Favorites]
        );
        assert_eq!(archive.owners().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_owner_without_collections_rejected() {
        let archive = archive();
        let err = archive
            .add_owner("alice", Vec::<CollectionType>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NoCollections(_)));
    }

    #[tokio::test]
    async fn test_unknown_owner() {
        let archive = archive();
        assert!(matches!(
            archive.deactivate_owner("nobody").await,
            Err(ArchiveError::UnknownOwner(_))
        ));
        assert!(matches!(
            archive.work_list(&UpdateRequest::owners(["nobody"])).await,
            Err(ArchiveError::UnknownOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_work_list_filters() {
        use CollectionType::*;
        let archive = archive();
        archive.add_owner("alice", [Gallery, Scraps]).await.unwrap();
        archive.add_owner("bob", [Gallery, Journals]).await.unwrap();
        archive.add_owner("carol", [Favorites]).await.unwrap();
        archive.deactivate_owner("carol").await.unwrap();

        let keys = |jobs: Vec<SyncJob>| {
            jobs.into_iter()
                .map(|j| format!("{}/{}", j.owner, j.collection))
                .collect::<Vec<_>>()
        };

        let all = archive.work_list(&UpdateRequest::all()).await.unwrap();
        assert_eq!(keys(all), vec!["alice/gallery", "alice/scraps", "bob/gallery", "bob/journals"]);

        let galleries = archive
            .work_list(&UpdateRequest::all().collections([Gallery]).include_deactivated())
            .await
            .unwrap();
        assert_eq!(keys(galleries), vec!["alice/gallery", "bob/gallery"]);

        let carol = archive
            .work_list(&UpdateRequest::owners(["carol"]).include_deactivated().full())
            .await
            .unwrap();
        assert_eq!(carol.len(), 1);
        assert!(carol[0].force_full);
    }
}
