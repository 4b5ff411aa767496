//! Store traits: the abstract interface for archive persistence.
//!
//! These traits keep the sync engine storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use bytes::Bytes;

use galleria_core::{BlobId, CollectionType, CollectionWatermark, Item, ItemId, Owner};

use crate::error::Result;

/// Everything a planner commits for one fully reconciled page.
///
/// Applied atomically: either every upsert, every seen mark and the
/// watermark land, or none of them do.
#[derive(Debug, Clone)]
pub struct PageCommit {
    /// New or changed items of the page.
    pub upserts: Vec<Item>,
    /// Ids observed on the page. Clears their removal-candidate mark.
    pub seen: Vec<ItemId>,
    /// The watermark after this page.
    pub watermark: CollectionWatermark,
}

/// The final commit of a pass.
#[derive(Debug, Clone)]
pub struct PassCompletion {
    /// The watermark after the pass.
    pub watermark: CollectionWatermark,
    /// Mark every remaining removal candidate of the collection as removed.
    pub sweep: bool,
    /// Time recorded on swept items (Unix ms).
    pub now: i64,
}

/// Async interface for the archive database.
///
/// All methods are async so that blocking backends can run on a blocking
/// pool. SQLite uses `spawn_blocking` internally.
///
/// # Design Notes
///
/// - **Idempotent upserts**: upserting the same item twice leaves the same row.
/// - **Single writer per collection**: the sync engine never touches the same
///   (owner, collection) pair from two tasks, but different pairs are
///   written concurrently.
/// - **Two-phase removal**: [`Store::begin_removal_scan`] marks candidates,
///   commits clear marks for observed items, [`Store::finish_pass`] sweeps.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Item Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an item by its primary key.
    async fn get_item(&self, collection: CollectionType, id: &ItemId) -> Result<Option<Item>>;

    /// Insert or replace an item. Clears its removal-candidate mark.
    async fn upsert(&self, item: &Item) -> Result<()>;

    /// Mark items as removed.
    ///
    /// Returns how many items changed status; already removed items are
    /// not counted again.
    async fn mark_removed(&self, collection: CollectionType, ids: &[ItemId], now: i64)
        -> Result<usize>;

    /// List every item of one owner's collection, in no particular order.
    async fn list_items(&self, owner: &str, collection: CollectionType) -> Result<Vec<Item>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Watermark Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the watermark of a collection, or an empty one if never synced.
    async fn get_watermark(&self, owner: &str, collection: CollectionType)
        -> Result<CollectionWatermark>;

    /// Persist a watermark on its own.
    async fn commit_watermark(&self, watermark: &CollectionWatermark) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Pass Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Atomically apply one page's changes together with its watermark.
    async fn commit_page(&self, commit: &PageCommit) -> Result<()>;

    /// Mark every active item of the collection as a removal candidate.
    ///
    /// Returns the number of candidates.
    async fn begin_removal_scan(&self, owner: &str, collection: CollectionType) -> Result<usize>;

    /// Atomically write the final watermark and, if requested, sweep the
    /// remaining candidates. Returns the ids that were marked removed.
    async fn finish_pass(&self, completion: &PassCompletion) -> Result<Vec<ItemId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Owner Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace an owner registration.
    async fn upsert_owner(&self, owner: &Owner) -> Result<()>;

    /// Get an owner by handle.
    async fn get_owner(&self, handle: &str) -> Result<Option<Owner>>;

    /// List all owners, ordered by handle.
    async fn list_owners(&self) -> Result<Vec<Owner>>;

    /// Set an owner's active flag. Returns false if the owner is unknown.
    async fn set_owner_active(&self, handle: &str, active: bool) -> Result<bool>;
}

/// Content-addressed storage for binary assets.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their content address. Idempotent.
    async fn put(&self, data: Bytes) -> Result<BlobId>;

    /// Fetch bytes by content address.
    async fn get(&self, id: &BlobId) -> Result<Option<Bytes>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Active items of a collection, sorted by id.
    fn active_items(
        &self,
        owner: &str,
        collection: CollectionType,
    ) -> impl std::future::Future<Output = Result<Vec<Item>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn active_items(&self, owner: &str, collection: CollectionType) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .list_items(owner, collection)
            .await?
            .into_iter()
            .filter(Item::is_active)
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}
