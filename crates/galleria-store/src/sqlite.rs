//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the archive. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.
//! Multi-row operations (page commits, pass completion) run in a single
//! SQLite transaction.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use galleria_core::{
    now_millis, BlobId, CollectionType, CollectionWatermark, Item, ItemId, ItemStatus, Owner,
    PassCheckpoint, RevisionHash,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{BlobStore, PageCommit, PassCompletion, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection from the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

const ITEM_COLUMNS: &str = "id, collection, owner, author, title, description, tags, file_url,
    revision_hash, blob_id, thumbnail_blob_id, surrogate, target_id, posted_at,
    first_seen_at, last_updated_at, status";

fn conversion_error<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn parse_collection(idx: usize, s: &str) -> rusqlite::Result<CollectionType> {
    CollectionType::from_str(s).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let collection: String = row.get("collection")?;
    let tags_cbor: Vec<u8> = row.get("tags")?;
    let hash_bytes: Vec<u8> = row.get("revision_hash")?;
    let status: String = row.get("status")?;

    let tags: Vec<String> = if tags_cbor.is_empty() {
        Vec::new()
    } else {
        ciborium::from_reader(&tags_cbor[..]).map_err(|e| conversion_error(6, Type::Blob, e))?
    };

    let revision_hash = RevisionHash(
        hash_bytes
            .try_into()
            .map_err(|_| rusqlite::Error::InvalidColumnType(8, "revision_hash".into(), Type::Blob))?,
    );

    Ok(Item {
        id: ItemId(row.get("id")?),
        owner: row.get("owner")?,
        collection: parse_collection(1, &collection)?,
        author: row.get("author")?,
        title: row.get("title")?,
        description: row.get("description")?,
        tags,
        file_url: row.get("file_url")?,
        revision_hash,
        blob_id: row.get::<_, Option<String>>("blob_id")?.map(BlobId),
        thumbnail_blob_id: row.get::<_, Option<String>>("thumbnail_blob_id")?.map(BlobId),
        surrogate: row.get("surrogate")?,
        target_id: row.get::<_, Option<String>>("target_id")?.map(ItemId),
        posted_at: row.get("posted_at")?,
        first_seen_at: row.get("first_seen_at")?,
        last_updated_at: row.get("last_updated_at")?,
        status: status
            .parse::<ItemStatus>()
            .map_err(|e| conversion_error(16, Type::Text, e))?,
    })
}

fn row_to_watermark(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionWatermark> {
    let collection: String = row.get("collection")?;
    let checkpoint: Option<Vec<u8>> = row.get("checkpoint")?;
    let checkpoint = checkpoint
        .map(|bytes| PassCheckpoint::from_bytes(&bytes))
        .transpose()
        .map_err(|e| conversion_error(6, Type::Blob, e))?;

    Ok(CollectionWatermark {
        owner: row.get("owner")?,
        collection: parse_collection(1, &collection)?,
        last_synced_page: row.get("last_synced_page")?,
        last_synced_item_id: row.get::<_, Option<String>>("last_synced_item_id")?.map(ItemId),
        completed_full_pass: row.get("completed_full_pass")?,
        last_sync_timestamp: row.get("last_sync_timestamp")?,
        checkpoint,
    })
}

fn row_to_owner(row: &rusqlite::Row<'_>) -> rusqlite::Result<Owner> {
    let collections: String = row.get("collections")?;
    let collections = collections
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| parse_collection(1, s))
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    Ok(Owner {
        handle: row.get("handle")?,
        collections,
        active: row.get("active")?,
    })
}

fn encode_tags(tags: &[String]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(tags, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn write_item(conn: &Connection, item: &Item) -> Result<()> {
    let tags = encode_tags(&item.tags)?;

    conn.execute(
        "INSERT INTO items (
            id, collection, owner, author, title, description, tags, file_url,
            revision_hash, blob_id, thumbnail_blob_id, surrogate, target_id, posted_at,
            first_seen_at, last_updated_at, status, removal_candidate
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 0)
        ON CONFLICT(id, collection) DO UPDATE SET
            owner = excluded.owner,
            author = excluded.author,
            title = excluded.title,
            description = excluded.description,
            tags = excluded.tags,
            file_url = excluded.file_url,
            revision_hash = excluded.revision_hash,
            blob_id = excluded.blob_id,
            thumbnail_blob_id = excluded.thumbnail_blob_id,
            surrogate = excluded.surrogate,
            target_id = excluded.target_id,
            posted_at = excluded.posted_at,
            first_seen_at = excluded.first_seen_at,
            last_updated_at = excluded.last_updated_at,
            status = excluded.status,
            removal_candidate = 0",
        params![
            item.id.as_str(),
            item.collection.as_str(),
            item.owner,
            item.author,
            item.title,
            item.description,
            tags,
            item.file_url,
            item.revision_hash.0.as_slice(),
            item.blob_id.as_ref().map(BlobId::as_str),
            item.thumbnail_blob_id.as_ref().map(BlobId::as_str),
            item.surrogate,
            item.target_id.as_ref().map(ItemId::as_str),
            item.posted_at,
            item.first_seen_at,
            item.last_updated_at,
            item.status.as_str(),
        ],
    )?;

    Ok(())
}

fn write_watermark(conn: &Connection, wm: &CollectionWatermark) -> Result<()> {
    let checkpoint = wm.checkpoint.as_ref().map(PassCheckpoint::to_bytes).transpose()?;

    conn.execute(
        "INSERT INTO watermarks (
            owner, collection, last_synced_page, last_synced_item_id,
            completed_full_pass, last_sync_timestamp, checkpoint
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(owner, collection) DO UPDATE SET
            last_synced_page = excluded.last_synced_page,
            last_synced_item_id = excluded.last_synced_item_id,
            completed_full_pass = excluded.completed_full_pass,
            last_sync_timestamp = excluded.last_sync_timestamp,
            checkpoint = excluded.checkpoint",
        params![
            wm.owner,
            wm.collection.as_str(),
            wm.last_synced_page,
            wm.last_synced_item_id.as_ref().map(ItemId::as_str),
            wm.completed_full_pass,
            wm.last_sync_timestamp,
            checkpoint,
        ],
    )?;

    Ok(())
}

fn clear_candidate(conn: &Connection, collection: CollectionType, id: &ItemId) -> Result<()> {
    conn.execute(
        "UPDATE items SET removal_candidate = 0 WHERE id = ?1 AND collection = ?2",
        params![id.as_str(), collection.as_str()],
    )?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_item(&self, collection: CollectionType, id: &ItemId) -> Result<Option<Item>> {
        let id = id.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM items WHERE id = ?1 AND collection = ?2",
                    ITEM_COLUMNS
                ),
                params![id.as_str(), collection.as_str()],
                row_to_item,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn upsert(&self, item: &Item) -> Result<()> {
        let item = item.clone();
        self.run(move |conn| write_item(conn, &item)).await
    }

    async fn mark_removed(
        &self,
        collection: CollectionType,
        ids: &[ItemId],
        now: i64,
    ) -> Result<usize> {
        let ids = ids.to_vec();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;

            for id in &ids {
                changed += tx.execute(
                    "UPDATE items SET status = 'removed', last_updated_at = ?3
                     WHERE id = ?1 AND collection = ?2 AND status = 'active'",
                    params![id.as_str(), collection.as_str(), now],
                )?;
                clear_candidate(&tx, collection, id)?;
            }

            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn list_items(&self, owner: &str, collection: CollectionType) -> Result<Vec<Item>> {
        let owner = owner.to_string();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM items WHERE owner = ?1 AND collection = ?2",
                ITEM_COLUMNS
            ))?;

            let items = stmt
                .query_map(params![owner, collection.as_str()], row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(items)
        })
        .await
    }

    async fn get_watermark(
        &self,
        owner: &str,
        collection: CollectionType,
    ) -> Result<CollectionWatermark> {
        let owner = owner.to_string();

        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT owner, collection, last_synced_page, last_synced_item_id,
                            completed_full_pass, last_sync_timestamp, checkpoint
                     FROM watermarks WHERE owner = ?1 AND collection = ?2",
                    params![owner, collection.as_str()],
                    row_to_watermark,
                )
                .optional()?;

            Ok(found.unwrap_or_else(|| CollectionWatermark::empty(owner, collection)))
        })
        .await
    }

    async fn commit_watermark(&self, watermark: &CollectionWatermark) -> Result<()> {
        let wm = watermark.clone();
        self.run(move |conn| write_watermark(conn, &wm)).await
    }

    async fn commit_page(&self, commit: &PageCommit) -> Result<()> {
        let commit = commit.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let collection = commit.watermark.collection;

            for item in &commit.upserts {
                write_item(&tx, item)?;
            }
            for id in &commit.seen {
                clear_candidate(&tx, collection, id)?;
            }
            write_watermark(&tx, &commit.watermark)?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn begin_removal_scan(&self, owner: &str, collection: CollectionType) -> Result<usize> {
        let owner = owner.to_string();

        self.run(move |conn| {
            let marked = conn.execute(
                "UPDATE items SET removal_candidate = 1
                 WHERE owner = ?1 AND collection = ?2 AND status = 'active'",
                params![owner, collection.as_str()],
            )?;
            Ok(marked)
        })
        .await
    }

    async fn finish_pass(&self, completion: &PassCompletion) -> Result<Vec<ItemId>> {
        let completion = completion.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let owner = completion.watermark.owner.clone();
            let collection = completion.watermark.collection;
            let mut removed = Vec::new();

            if completion.sweep {
                {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM items
                         WHERE owner = ?1 AND collection = ?2
                           AND removal_candidate = 1 AND status = 'active'
                         ORDER BY id",
                    )?;
                    removed = stmt
                        .query_map(params![owner, collection.as_str()], |row| {
                            row.get::<_, String>(0).map(ItemId)
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                }

                tx.execute(
                    "UPDATE items SET status = 'removed', last_updated_at = ?3
                     WHERE owner = ?1 AND collection = ?2
                       AND removal_candidate = 1 AND status = 'active'",
                    params![owner, collection.as_str(), completion.now],
                )?;
                tx.execute(
                    "UPDATE items SET removal_candidate = 0
                     WHERE owner = ?1 AND collection = ?2 AND removal_candidate = 1",
                    params![owner, collection.as_str()],
                )?;
            }

            write_watermark(&tx, &completion.watermark)?;
            tx.commit()?;

            if !removed.is_empty() {
                tracing::debug!(%owner, %collection, count = removed.len(), "swept removed items");
            }
            Ok(removed)
        })
        .await
    }

    async fn upsert_owner(&self, owner: &Owner) -> Result<()> {
        let owner = owner.clone();

        self.run(move |conn| {
            let collections = owner
                .collections
                .iter()
                .map(CollectionType::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let now = now_millis();

            conn.execute(
                "INSERT INTO owners (handle, collections, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(handle) DO UPDATE SET
                    collections = excluded.collections,
                    active = excluded.active,
                    updated_at = excluded.updated_at",
                params![owner.handle, collections, owner.active, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_owner(&self, handle: &str) -> Result<Option<Owner>> {
        let handle = handle.to_string();

        self.run(move |conn| {
            conn.query_row(
                "SELECT handle, collections, active FROM owners WHERE handle = ?1",
                params![handle],
                row_to_owner,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT handle, collections, active FROM owners ORDER BY handle")?;
            let owners = stmt
                .query_map([], row_to_owner)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(owners)
        })
        .await
    }

    async fn set_owner_active(&self, handle: &str, active: bool) -> Result<bool> {
        let handle = handle.to_string();

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE owners SET active = ?2, updated_at = ?3 WHERE handle = ?1",
                params![handle, active, now_millis()],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl BlobStore for SqliteStore {
    async fn put(&self, data: Bytes) -> Result<BlobId> {
        self.run(move |conn| {
            let id = BlobId::for_content(&data);
            conn.execute(
                "INSERT OR IGNORE INTO blobs (blob_id, data, size, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), data.as_ref(), data.len() as i64, now_millis()],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: &BlobId) -> Result<Option<Bytes>> {
        let id = id.clone();

        self.run(move |conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM blobs WHERE blob_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_core::{CursorState, DetailRecord, ItemSummary, PageToken, PassMode};

    fn make_item(owner: &str, collection: CollectionType, id: &str) -> Item {
        let detail = DetailRecord {
            id: ItemId::from(id),
            author: owner.to_string(),
            title: format!("title {}", id),
            description: "desc".into(),
            tags: vec!["Ink".into(), "sketch".into()],
            file_url: Some(format!("https://cdn.test/{}.png", id)),
            thumbnail_url: None,
            posted_at: Some(1_700_000_000_000),
        };
        let summary = ItemSummary::new(id).with_surrogate("s1");
        Item::from_detail(owner, collection, &summary, &detail, 1000)
    }

    #[tokio::test]
    async fn test_item_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let mut item = make_item("alice", CollectionType::Favorites, "fav-1");
        item.target_id = Some(ItemId::from("1005"));
        item.blob_id = Some(BlobId::for_content(b"png"));

        store.upsert(&item).await.unwrap();
        let fetched = store
            .get_item(CollectionType::Favorites, &ItemId::from("fav-1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched, item);
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert(&make_item("alice", CollectionType::Gallery, "1"))
            .await
            .unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE items SET status = 'archived'", [])
            .unwrap();

        let result = store.get_item(CollectionType::Gallery, &ItemId::from("1")).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item("alice", CollectionType::Gallery, "1");
        store.upsert(&item).await.unwrap();

        let mut edited = item.clone();
        edited.title = "retitled".into();
        edited.last_updated_at = 2000;
        store.upsert(&edited).await.unwrap();

        let items = store.list_items("alice", CollectionType::Gallery).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "retitled");
        assert_eq!(items[0].first_seen_at, 1000);
    }

    #[tokio::test]
    async fn test_watermark_default_and_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let empty = store.get_watermark("alice", CollectionType::Gallery).await.unwrap();
        assert_eq!(empty, CollectionWatermark::empty("alice", CollectionType::Gallery));

        let mut wm = empty.clone();
        wm.advance(PassCheckpoint {
            mode: PassMode::Full,
            cursor: CursorState::start(PageToken::Opaque("next/abc".into())),
            head_item_id: Some(ItemId::from("1005")),
            pages_committed: 1,
            started_at: 10,
        });
        store.commit_watermark(&wm).await.unwrap();

        let fetched = store.get_watermark("alice", CollectionType::Gallery).await.unwrap();
        assert_eq!(fetched, wm);
    }

    #[tokio::test]
    async fn test_commit_page_and_sweep() {
        let store = SqliteStore::open_memory().unwrap();
        for id in ["1", "2", "3"] {
            store
                .upsert(&make_item("alice", CollectionType::Gallery, id))
                .await
                .unwrap();
        }

        assert_eq!(
            store.begin_removal_scan("alice", CollectionType::Gallery).await.unwrap(),
            3
        );

        let mut wm = CollectionWatermark::empty("alice", CollectionType::Gallery);
        store
            .commit_page(&PageCommit {
                upserts: vec![make_item("alice", CollectionType::Gallery, "4")],
                seen: vec![ItemId::from("1"), ItemId::from("4")],
                watermark: wm.clone(),
            })
            .await
            .unwrap();

        wm.complete(PassMode::Full, Some(ItemId::from("4")), 1, 5000);
        let removed = store
            .finish_pass(&PassCompletion {
                watermark: wm.clone(),
                sweep: true,
                now: 5000,
            })
            .await
            .unwrap();

        assert_eq!(removed, vec![ItemId::from("2"), ItemId::from("3")]);

        let gone = store
            .get_item(CollectionType::Gallery, &ItemId::from("2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gone.status, ItemStatus::Removed);
        assert_eq!(gone.last_updated_at, 5000);

        let stored_wm = store.get_watermark("alice", CollectionType::Gallery).await.unwrap();
        assert!(stored_wm.completed_full_pass);
        assert_eq!(stored_wm.last_synced_item_id, Some(ItemId::from("4")));
    }

    #[tokio::test]
    async fn test_mark_removed_is_counted_once() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert(&make_item("alice", CollectionType::Scraps, "7"))
            .await
            .unwrap();

        let ids = [ItemId::from("7")];
        assert_eq!(store.mark_removed(CollectionType::Scraps, &ids, 1).await.unwrap(), 1);
        assert_eq!(store.mark_removed(CollectionType::Scraps, &ids, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_owners() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_owner(&Owner::new("bob", [CollectionType::Gallery]))
            .await
            .unwrap();
        store
            .upsert_owner(&Owner::new(
                "alice",
                [CollectionType::Gallery, CollectionType::Favorites],
            ))
            .await
            .unwrap();

        let owners = store.list_owners().await.unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].handle, "alice");
        assert_eq!(owners[0].collections.len(), 2);

        assert!(store.set_owner_active("bob", false).await.unwrap());
        assert!(!store.get_owner("bob").await.unwrap().unwrap().active);
        assert!(store.get_owner("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blobs_are_deduplicated() {
        let store = SqliteStore::open_memory().unwrap();
        let a = store.put(Bytes::from_static(b"image")).await.unwrap();
        let b = store.put(Bytes::from_static(b"image")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(&a).await.unwrap().unwrap(), Bytes::from_static(b"image"));
        assert!(store.get(&BlobId::for_content(b"nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert(&make_item("alice", CollectionType::Gallery, "1"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let item = store
            .get_item(CollectionType::Gallery, &ItemId::from("1"))
            .await
            .unwrap();
        assert!(item.is_some());
    }
}
