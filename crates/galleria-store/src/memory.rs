//! In-memory implementations of the store traits.
//!
//! These are primarily for testing. They have the same semantics as SQLite
//! but keep everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use galleria_core::{
    BlobId, CollectionType, CollectionWatermark, Item, ItemId, ItemStatus, Owner,
};

use crate::error::Result;
use crate::traits::{BlobStore, PageCommit, PassCompletion, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; every
/// multi-row operation runs under one write guard, which makes it atomic.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Items indexed by primary key.
    items: HashMap<(CollectionType, ItemId), StoredItem>,

    /// Watermarks indexed by (owner, collection).
    watermarks: HashMap<(String, CollectionType), CollectionWatermark>,

    /// Owners indexed by handle.
    owners: BTreeMap<String, Owner>,
}

struct StoredItem {
    item: Item,
    removal_candidate: bool,
}

impl MemoryStoreInner {
    fn upsert(&mut self, item: &Item) {
        self.items.insert(
            (item.collection, item.id.clone()),
            StoredItem {
                item: item.clone(),
                removal_candidate: false,
            },
        );
    }

    fn clear_candidate(&mut self, collection: CollectionType, id: &ItemId) {
        if let Some(stored) = self.items.get_mut(&(collection, id.clone())) {
            stored.removal_candidate = false;
        }
    }

    fn put_watermark(&mut self, watermark: &CollectionWatermark) {
        self.watermarks.insert(
            (watermark.owner.clone(), watermark.collection),
            watermark.clone(),
        );
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of stored items across all collections.
    pub fn item_count(&self) -> usize {
        self.inner.read().unwrap().items.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_item(&self, collection: CollectionType, id: &ItemId) -> Result<Option<Item>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .items
            .get(&(collection, id.clone()))
            .map(|s| s.item.clone()))
    }

    async fn upsert(&self, item: &Item) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.upsert(item);
        Ok(())
    }

    async fn mark_removed(
        &self,
        collection: CollectionType,
        ids: &[ItemId],
        now: i64,
    ) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        let mut changed = 0;

        for id in ids {
            if let Some(stored) = inner.items.get_mut(&(collection, id.clone())) {
                if stored.item.status == ItemStatus::Active {
                    stored.item.status = ItemStatus::Removed;
                    stored.item.last_updated_at = now;
                    changed += 1;
                }
                stored.removal_candidate = false;
            }
        }

        Ok(changed)
    }

    async fn list_items(&self, owner: &str, collection: CollectionType) -> Result<Vec<Item>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .items
            .values()
            .filter(|s| s.item.owner == owner && s.item.collection == collection)
            .map(|s| s.item.clone())
            .collect())
    }

    async fn get_watermark(
        &self,
        owner: &str,
        collection: CollectionType,
    ) -> Result<CollectionWatermark> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .watermarks
            .get(&(owner.to_string(), collection))
            .cloned()
            .unwrap_or_else(|| CollectionWatermark::empty(owner, collection)))
    }

    async fn commit_watermark(&self, watermark: &CollectionWatermark) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.put_watermark(watermark);
        Ok(())
    }

    async fn commit_page(&self, commit: &PageCommit) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let collection = commit.watermark.collection;

        for item in &commit.upserts {
            inner.upsert(item);
        }
        for id in &commit.seen {
            inner.clear_candidate(collection, id);
        }
        inner.put_watermark(&commit.watermark);

        Ok(())
    }

    async fn begin_removal_scan(&self, owner: &str, collection: CollectionType) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        let mut marked = 0;

        for stored in inner.items.values_mut() {
            if stored.item.owner == owner
                && stored.item.collection == collection
                && stored.item.is_active()
            {
                stored.removal_candidate = true;
                marked += 1;
            }
        }

        Ok(marked)
    }

    async fn finish_pass(&self, completion: &PassCompletion) -> Result<Vec<ItemId>> {
        let mut inner = self.inner.write().unwrap();
        let owner = completion.watermark.owner.as_str();
        let collection = completion.watermark.collection;
        let mut removed = Vec::new();

        if completion.sweep {
            for stored in inner.items.values_mut() {
                if stored.item.owner != owner || stored.item.collection != collection {
                    continue;
                }
                if stored.removal_candidate && stored.item.is_active() {
                    stored.item.status = ItemStatus::Removed;
                    stored.item.last_updated_at = completion.now;
                    removed.push(stored.item.id.clone());
                }
                stored.removal_candidate = false;
            }
        }

        inner.put_watermark(&completion.watermark);
        removed.sort();
        Ok(removed)
    }

    async fn upsert_owner(&self, owner: &Owner) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.owners.insert(owner.handle.clone(), owner.clone());
        Ok(())
    }

    async fn get_owner(&self, handle: &str) -> Result<Option<Owner>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.owners.get(handle).cloned())
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.owners.values().cloned().collect())
    }

    async fn set_owner_active(&self, handle: &str, active: bool) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        match inner.owners.get_mut(handle) {
            Some(owner) => {
                owner.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory content-addressed blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
}

impl MemoryBlobStore {
    /// Create a new empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobId> {
        let id = BlobId::for_content(&data);
        self.blobs.write().unwrap().entry(id.clone()).or_insert(data);
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().unwrap().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_core::{DetailRecord, ItemSummary};
    use proptest::prelude::*;

    fn make_item(owner: &str, id: &str) -> Item {
        let detail = DetailRecord {
            id: ItemId::from(id),
            author: owner.to_string(),
            title: format!("title {}", id),
            description: String::new(),
            tags: vec![],
            file_url: None,
            thumbnail_url: None,
            posted_at: None,
        };
        Item::from_detail(owner, CollectionType::Gallery, &ItemSummary::new(id), &detail, 1000)
    }

    fn watermark(owner: &str) -> CollectionWatermark {
        CollectionWatermark::empty(owner, CollectionType::Gallery)
    }

    #[tokio::test]
    async fn test_memory_store_upsert_and_get() {
        let store = MemoryStore::new();
        let item = make_item("alice", "1");

        store.upsert(&item).await.unwrap();
        let fetched = store
            .get_item(CollectionType::Gallery, &ItemId::from("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, item);

        // Same key in another collection is a different row
        let missing = store
            .get_item(CollectionType::Scraps, &ItemId::from("1"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_removal_sweep() {
        let store = MemoryStore::new();
        for id in ["1", "2", "3"] {
            store.upsert(&make_item("alice", id)).await.unwrap();
        }
        store.upsert(&make_item("bob", "4")).await.unwrap();

        let marked = store
            .begin_removal_scan("alice", CollectionType::Gallery)
            .await
            .unwrap();
        assert_eq!(marked, 3);

        store
            .commit_page(&PageCommit {
                upserts: vec![],
                seen: vec![ItemId::from("1"), ItemId::from("3")],
                watermark: watermark("alice"),
            })
            .await
            .unwrap();

        let removed = store
            .finish_pass(&PassCompletion {
                watermark: watermark("alice"),
                sweep: true,
                now: 2000,
            })
            .await
            .unwrap();
        assert_eq!(removed, vec![ItemId::from("2")]);

        // Bob's collection is untouched
        let bob = store
            .get_item(CollectionType::Gallery, &ItemId::from("4"))
            .await
            .unwrap()
            .unwrap();
        assert!(bob.is_active());

        // A second sweep removes nothing
        let again = store
            .finish_pass(&PassCompletion {
                watermark: watermark("alice"),
                sweep: true,
                now: 3000,
            })
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_mark_removed_counts_once() {
        let store = MemoryStore::new();
        store.upsert(&make_item("alice", "1")).await.unwrap();

        let ids = vec![ItemId::from("1"), ItemId::from("missing")];
        assert_eq!(store.mark_removed(CollectionType::Gallery, &ids, 5).await.unwrap(), 1);
        assert_eq!(store.mark_removed(CollectionType::Gallery, &ids, 6).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_owner_registry() {
        let store = MemoryStore::new();
        store
            .upsert_owner(&Owner::new("alice", [CollectionType::Gallery]))
            .await
            .unwrap();

        assert!(store.set_owner_active("alice", false).await.unwrap());
        assert!(!store.set_owner_active("nobody", false).await.unwrap());
        assert!(!store.get_owner("alice").await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_blob_store_dedupes() {
        let blobs = MemoryBlobStore::new();
        let a = blobs.put(Bytes::from_static(b"png")).await.unwrap();
        let b = blobs.put(Bytes::from_static(b"png")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.get(&a).await.unwrap().unwrap(), Bytes::from_static(b"png"));
    }

    proptest! {
        #[test]
        fn test_upsert_replay_is_idempotent(ids in prop::collection::vec("[0-9]{1,4}", 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for id in &ids {
                    store.upsert(&make_item("alice", id)).await.unwrap();
                }
                let first = store.item_count();
                for id in &ids {
                    store.upsert(&make_item("alice", id)).await.unwrap();
                }
                assert_eq!(store.item_count(), first);
            });
        }
    }
}
