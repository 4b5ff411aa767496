//! Item reconciliation: deciding what a listing entry means for the archive.
//!
//! ## Decision Table
//!
//! | stored              | change marker        | action                                     |
//! |---------------------|----------------------|--------------------------------------------|
//! | absent              | -                    | fetch detail, stage insert, `Created`      |
//! | removed             | -                    | fetch detail, stage reactivation, `Updated`|
//! | present             | same                 | `Unchanged`, no fetch                      |
//! | present             | different            | fetch detail; `Updated` if the revision    |
//! |                     |                      | hash changed, else `Unchanged`             |
//! | present             | unknown              | per [`UnknownSurrogate`] policy            |
//!
//! Items named by id skip the marker check: a stored active item is left
//! alone unless the caller asks to replace it.
//!
//! The synchronizer never writes items itself. It returns the item to stage
//! and the planner commits a page's staged items together with its
//! watermark. Failures surface as [`SyncOutcome::Failed`] with nothing
//! staged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use galleria_core::{
    now_millis, BlobId, CollectionType, DetailRecord, Item, ItemId, ItemSummary, SyncOutcome,
};
use galleria_store::BlobStore;

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::endpoints::Endpoints;
use crate::error::{Result, SyncError};
use crate::extractor::PageExtractor;
use crate::fetch::FetchGateway;

// ─────────────────────────────────────────────────────────────────────────────
// Surrogate comparison
// ─────────────────────────────────────────────────────────────────────────────

/// Result of comparing a stored item against a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurrogateMatch {
    /// The listing says the item has not changed.
    Same,
    /// The listing says the item changed.
    Different,
    /// The listing carries nothing to compare.
    Unknown,
}

/// Decides from listing data alone whether an item may have changed.
///
/// Sites differ in what (if anything) a listing exposes per entry, so this
/// is pluggable.
pub trait SurrogateComparator: Send + Sync {
    fn compare(&self, stored: &Item, summary: &ItemSummary) -> SurrogateMatch;
}

/// Compares the opaque change marker of the listing entry with the one
/// stored from the last fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerComparator;

impl SurrogateComparator for MarkerComparator {
    fn compare(&self, stored: &Item, summary: &ItemSummary) -> SurrogateMatch {
        match (&stored.surrogate, &summary.surrogate) {
            (Some(a), Some(b)) if a == b => SurrogateMatch::Same,
            (Some(_), Some(_)) => SurrogateMatch::Different,
            _ => SurrogateMatch::Unknown,
        }
    }
}

/// Policy for [`SurrogateMatch::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSurrogate {
    /// Treat the item as unchanged. Edits are picked up by the next full pass.
    #[default]
    AssumeUnchanged,
    /// Fetch the detail page to find out.
    Refetch,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────────────────────────

/// Which assets of an item could not be downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetErrors {
    pub file: bool,
    pub thumbnail: bool,
}

/// The result of reconciling one listing entry.
#[derive(Debug)]
pub struct Reconciliation {
    pub outcome: SyncOutcome,
    /// Item to upsert when the page commits.
    pub staged: Option<Item>,
    /// Assets that failed to download; the item is staged without them.
    pub asset_errors: AssetErrors,
    /// Why the outcome is `Failed`.
    pub error: Option<SyncError>,
}

impl Reconciliation {
    fn unchanged(summary: &ItemSummary) -> Self {
        Self {
            outcome: SyncOutcome::Unchanged(summary.id.clone()),
            staged: None,
            asset_errors: AssetErrors::default(),
            error: None,
        }
    }

    fn predicted(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            staged: None,
            asset_errors: AssetErrors::default(),
            error: None,
        }
    }

    fn failed(summary: &ItemSummary, error: SyncError) -> Self {
        Self {
            outcome: SyncOutcome::Failed {
                id: summary.id.clone(),
                reason: error.to_string(),
            },
            staged: None,
            asset_errors: AssetErrors::default(),
            error: Some(error),
        }
    }
}

/// Reconciles listing entries of one owner's collection with the store.
pub struct ItemSynchronizer {
    owner: String,
    collection: CollectionType,
    gateway: FetchGateway,
    endpoints: Arc<dyn Endpoints>,
    extractor: Arc<dyn PageExtractor>,
    blobs: Arc<dyn BlobStore>,
    comparator: Arc<dyn SurrogateComparator>,
    config: SyncConfig,
}

enum Action {
    Create,
    Refresh { reactivate: bool },
}

impl ItemSynchronizer {
    /// A synchronizer for one collection, fetching through `gateway`.
    pub fn new(
        ctx: &SyncContext,
        gateway: FetchGateway,
        owner: impl Into<String>,
        collection: CollectionType,
    ) -> Self {
        Self {
            owner: owner.into(),
            collection,
            gateway,
            endpoints: ctx.endpoints.clone(),
            extractor: ctx.extractor.clone(),
            blobs: ctx.blobs.clone(),
            comparator: ctx.comparator.clone(),
            config: ctx.config.clone(),
        }
    }

    /// Reconcile one listing entry with its stored record.
    pub async fn reconcile(&self, summary: &ItemSummary, stored: Option<&Item>) -> Reconciliation {
        let action = match stored {
            None => Action::Create,
            Some(item) if !item.is_active() => Action::Refresh { reactivate: true },
            Some(item) => match self.comparator.compare(item, summary) {
                SurrogateMatch::Same => return Reconciliation::unchanged(summary),
                SurrogateMatch::Unknown
                    if self.config.unknown_surrogate == UnknownSurrogate::AssumeUnchanged =>
                {
                    return Reconciliation::unchanged(summary)
                }
                SurrogateMatch::Unknown | SurrogateMatch::Different => {
                    Action::Refresh { reactivate: false }
                }
            },
        };

        self.apply(action, summary, stored).await
    }

    /// Reconcile an item named by id rather than found on a listing.
    ///
    /// A stored active item is left alone unless `replace` is set, in which
    /// case its detail page is fetched again whatever its change marker
    /// says. The stored marker and favorite target are kept.
    pub async fn reconcile_by_id(
        &self,
        id: &ItemId,
        stored: Option<&Item>,
        replace: bool,
    ) -> Reconciliation {
        let summary = match stored {
            Some(item) => ItemSummary {
                surrogate: item.surrogate.clone(),
                target_id: item.target_id.clone(),
                ..ItemSummary::new(id.clone())
            },
            None => ItemSummary::new(id.clone()),
        };

        let action = match stored {
            None => Action::Create,
            Some(item) if !item.is_active() => Action::Refresh { reactivate: true },
            Some(_) if replace => Action::Refresh { reactivate: false },
            Some(_) => return Reconciliation::unchanged(&summary),
        };

        self.apply(action, &summary, stored).await
    }

    async fn apply(
        &self,
        action: Action,
        summary: &ItemSummary,
        stored: Option<&Item>,
    ) -> Reconciliation {
        if self.config.dry_run {
            let outcome = match action {
                Action::Create => SyncOutcome::Created(summary.id.clone()),
                Action::Refresh { .. } => SyncOutcome::Updated(summary.id.clone()),
            };
            return Reconciliation::predicted(outcome);
        }

        let detail = match self.fetch_detail(summary).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::debug!(id = %summary.id, error = %e, "detail fetch failed");
                return Reconciliation::failed(summary, e);
            }
        };

        let now = now_millis();
        let result = match (action, stored) {
            (Action::Refresh { reactivate }, Some(previous)) => {
                self.refresh(summary, previous, &detail, reactivate, now).await
            }
            _ => self.create(summary, &detail, now).await,
        };

        result.unwrap_or_else(|e| Reconciliation::failed(summary, e))
    }

    async fn create(
        &self,
        summary: &ItemSummary,
        detail: &DetailRecord,
        now: i64,
    ) -> Result<Reconciliation> {
        let mut item = Item::from_detail(&self.owner, self.collection, summary, detail, now);
        let asset_errors = self.attach_assets(&mut item, summary, detail, None).await?;

        tracing::debug!(id = %summary.id, "created");
        Ok(Reconciliation {
            outcome: SyncOutcome::Created(summary.id.clone()),
            staged: Some(item),
            asset_errors,
            error: None,
        })
    }

    async fn refresh(
        &self,
        summary: &ItemSummary,
        previous: &Item,
        detail: &DetailRecord,
        reactivate: bool,
        now: i64,
    ) -> Result<Reconciliation> {
        let changed = detail.revision_hash() != previous.revision_hash;

        if !changed && !reactivate {
            // Only the marker moved; keep hash and timestamps as they are
            let staged = (previous.surrogate != summary.surrogate).then(|| Item {
                surrogate: summary.surrogate.clone(),
                ..previous.clone()
            });
            tracing::debug!(id = %summary.id, "revision unchanged");
            return Ok(Reconciliation {
                staged,
                ..Reconciliation::unchanged(summary)
            });
        }

        let mut item = previous.with_detail(summary, detail, now);
        let asset_errors = self
            .attach_assets(&mut item, summary, detail, Some(previous))
            .await?;

        tracing::debug!(id = %summary.id, reactivate, "updated");
        Ok(Reconciliation {
            outcome: SyncOutcome::Updated(summary.id.clone()),
            staged: Some(item),
            asset_errors,
            error: None,
        })
    }

    async fn fetch_detail(&self, summary: &ItemSummary) -> Result<DetailRecord> {
        let url = self
            .endpoints
            .detail_url(self.collection, summary.detail_id());
        let body = self.gateway.get(&self.owner, &url).await?;
        Ok(self.extractor.parse_detail(self.collection, &body)?)
    }

    /// Download the file and thumbnail into the blob store.
    ///
    /// A failed download leaves the blob unset and is reported; only
    /// cancellation and blob store failures fail the item.
    async fn attach_assets(
        &self,
        item: &mut Item,
        summary: &ItemSummary,
        detail: &DetailRecord,
        previous: Option<&Item>,
    ) -> Result<AssetErrors> {
        let mut errors = AssetErrors::default();
        if !self.config.download_assets || !self.collection.has_files() {
            return Ok(errors);
        }

        let same_file = previous.map_or(false, |p| p.file_url == detail.file_url);

        item.blob_id = match (&detail.file_url, previous) {
            (Some(_), Some(p)) if same_file && p.blob_id.is_some() => p.blob_id.clone(),
            (Some(url), _) => {
                let blob = self.download(url).await?;
                errors.file = blob.is_none();
                blob
            }
            (None, _) => None,
        };

        let thumbnail_url = detail
            .thumbnail_url
            .as_ref()
            .or(summary.thumbnail_url.as_ref());

        item.thumbnail_blob_id = match (thumbnail_url, previous) {
            (Some(_), Some(p)) if same_file && p.thumbnail_blob_id.is_some() => {
                p.thumbnail_blob_id.clone()
            }
            (Some(url), _) => {
                let blob = self.download(url).await?;
                errors.thumbnail = blob.is_none();
                blob
            }
            (None, _) => None,
        };

        Ok(errors)
    }

    async fn download(&self, url: &str) -> Result<Option<BlobId>> {
        match self.gateway.get(&self.owner, url).await {
            Ok(bytes) => Ok(Some(self.blobs.put(bytes).await?)),
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                tracing::warn!(owner = %self.owner, %url, error = %e, "asset download failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::DefaultEndpoints;
    use crate::error::TransportError;
    use crate::fetch::{Credentials, Fetcher};
    use async_trait::async_trait;
    use bytes::Bytes;
    use galleria_store::{MemoryBlobStore, MemoryStore};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal remote: detail pages and assets by URL, with a request log.
    #[derive(Default)]
    struct Remote {
        bodies: Mutex<HashMap<String, std::result::Result<Bytes, TransportError>>>,
        log: Mutex<Vec<String>>,
    }

    impl Remote {
        fn detail(&self, id: &str, title: &str, file: Option<&str>) {
            let detail = DetailRecord {
                id: ItemId::from(id),
                author: "alice".into(),
                title: title.into(),
                description: String::new(),
                tags: vec![],
                file_url: file.map(str::to_string),
                thumbnail_url: None,
                posted_at: None,
            };
            let body = serde_json::to_vec(&detail).unwrap();
            self.set(&format!("https://site.test/view/{}/", id), Ok(Bytes::from(body)));
        }

        fn set(&self, url: &str, body: std::result::Result<Bytes, TransportError>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
        }

        fn requests(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for Remote {
        async fn fetch(
            &self,
            url: &str,
            _credentials: &Credentials,
        ) -> std::result::Result<Bytes, TransportError> {
            self.log.lock().unwrap().push(url.to_string());
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or(Err(TransportError::Status(404)))
        }
    }

    fn synchronizer(remote: Arc<Remote>, config: SyncConfig) -> ItemSynchronizer {
        let ctx = SyncContext::builder()
            .store(Arc::new(MemoryStore::new()))
            .blobs(Arc::new(MemoryBlobStore::new()))
            .fetcher(remote)
            .endpoints(DefaultEndpoints::new("https://site.test"))
            .config(config)
            .build()
            .unwrap();
        let gateway = ctx.gateway.clone();
        ItemSynchronizer::new(&ctx, gateway, "alice", CollectionType::Gallery)
    }

    async fn created(sync: &ItemSynchronizer, summary: &ItemSummary) -> Item {
        let rec = sync.reconcile(summary, None).await;
        assert!(matches!(rec.outcome, SyncOutcome::Created(_)));
        rec.staged.unwrap()
    }

    #[tokio::test]
    async fn test_absent_item_is_created_with_assets() {
        let remote = Arc::new(Remote::default());
        remote.detail("1005", "Sunset", Some("https://cdn.test/1005.png"));
        remote.set("https://cdn.test/1005.png", Ok(Bytes::from_static(b"png")));

        let sync = synchronizer(remote, SyncConfig::default());
        let item = created(&sync, &ItemSummary::new("1005").with_surrogate("v1")).await;

        assert_eq!(item.title, "Sunset");
        assert_eq!(item.blob_id, Some(BlobId::for_content(b"png")));
        assert_eq!(item.surrogate.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_same_surrogate_skips_fetch() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);
        let sync = synchronizer(remote.clone(), SyncConfig::default());

        let summary = ItemSummary::new("7").with_surrogate("v1");
        let stored = created(&sync, &summary).await;
        let before = remote.requests().len();

        let rec = sync.reconcile(&summary, Some(&stored)).await;
        assert_eq!(rec.outcome, SyncOutcome::Unchanged(ItemId::from("7")));
        assert!(rec.staged.is_none());
        assert_eq!(remote.requests().len(), before);
    }

    #[tokio::test]
    async fn test_changed_surrogate_and_content_updates() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);
        let sync = synchronizer(remote.clone(), SyncConfig::default());
        let stored = created(&sync, &ItemSummary::new("7").with_surrogate("v1")).await;

        remote.detail("7", "Edited", None);
        let rec = sync
            .reconcile(&ItemSummary::new("7").with_surrogate("v2"), Some(&stored))
            .await;

        assert_eq!(rec.outcome, SyncOutcome::Updated(ItemId::from("7")));
        let staged = rec.staged.unwrap();
        assert_eq!(staged.title, "Edited");
        assert_eq!(staged.first_seen_at, stored.first_seen_at);
        assert_ne!(staged.revision_hash, stored.revision_hash);
    }

    #[tokio::test]
    async fn test_changed_surrogate_same_content_keeps_hash() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);
        let sync = synchronizer(remote, SyncConfig::default());
        let stored = created(&sync, &ItemSummary::new("7").with_surrogate("v1")).await;

        let rec = sync
            .reconcile(&ItemSummary::new("7").with_surrogate("v2"), Some(&stored))
            .await;

        assert_eq!(rec.outcome, SyncOutcome::Unchanged(ItemId::from("7")));
        let staged = rec.staged.unwrap();
        assert_eq!(staged.surrogate.as_deref(), Some("v2"));
        assert_eq!(staged.revision_hash, stored.revision_hash);
        assert_eq!(staged.last_updated_at, stored.last_updated_at);
    }

    #[tokio::test]
    async fn test_unknown_surrogate_policy() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);

        let assume = synchronizer(remote.clone(), SyncConfig::default());
        let stored = created(&assume, &ItemSummary::new("7")).await;
        let before = remote.requests().len();
        let rec = assume.reconcile(&ItemSummary::new("7"), Some(&stored)).await;
        assert!(rec.outcome.is_unchanged());
        assert_eq!(remote.requests().len(), before);

        let refetch = synchronizer(
            remote.clone(),
            SyncConfig {
                unknown_surrogate: UnknownSurrogate::Refetch,
                ..SyncConfig::default()
            },
        );
        let rec = refetch.reconcile(&ItemSummary::new("7"), Some(&stored)).await;
        assert!(rec.outcome.is_unchanged());
        assert_eq!(remote.requests().len(), before + 1);
    }

    #[tokio::test]
    async fn test_removed_item_is_reactivated() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);
        let sync = synchronizer(remote, SyncConfig::default());
        let summary = ItemSummary::new("7").with_surrogate("v1");

        let mut stored = created(&sync, &summary).await;
        stored.status = galleria_core::ItemStatus::Removed;

        let rec = sync.reconcile(&summary, Some(&stored)).await;
        assert_eq!(rec.outcome, SyncOutcome::Updated(ItemId::from("7")));
        assert!(rec.staged.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_detail_failure_stages_nothing() {
        let remote = Arc::new(Remote::default());
        remote.set(
            "https://site.test/view/1004/",
            Err(TransportError::Status(502)),
        );
        let sync = synchronizer(remote, SyncConfig::default());

        let rec = sync.reconcile(&ItemSummary::new("1004"), None).await;
        assert!(rec.outcome.is_failed());
        assert!(rec.staged.is_none());
        assert!(matches!(rec.error, Some(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_asset_failure_does_not_fail_item() {
        let remote = Arc::new(Remote::default());
        remote.detail("9", "Broken file", Some("https://cdn.test/9.png"));
        let sync = synchronizer(remote, SyncConfig::default());

        let rec = sync.reconcile(&ItemSummary::new("9"), None).await;
        assert!(matches!(rec.outcome, SyncOutcome::Created(_)));
        assert!(rec.asset_errors.file);
        assert!(rec.staged.unwrap().blob_id.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_downloaded_again() {
        let remote = Arc::new(Remote::default());
        remote.detail("5", "v1", Some("https://cdn.test/5.png"));
        remote.set("https://cdn.test/5.png", Ok(Bytes::from_static(b"png")));
        let sync = synchronizer(remote.clone(), SyncConfig::default());
        let stored = created(&sync, &ItemSummary::new("5").with_surrogate("a")).await;

        remote.detail("5", "v2", Some("https://cdn.test/5.png"));
        let rec = sync
            .reconcile(&ItemSummary::new("5").with_surrogate("b"), Some(&stored))
            .await;

        let file_fetches = remote
            .requests()
            .iter()
            .filter(|u| u.starts_with("https://cdn.test/"))
            .count();
        assert_eq!(file_fetches, 1);
        assert_eq!(rec.staged.unwrap().blob_id, stored.blob_id);
    }

    #[tokio::test]
    async fn test_favorite_link_fetches_target() {
        let remote = Arc::new(Remote::default());
        remote.detail("1005", "Sunset", None);
        let ctx = SyncContext::builder()
            .store(Arc::new(MemoryStore::new()))
            .blobs(Arc::new(MemoryBlobStore::new()))
            .fetcher(remote.clone())
            .endpoints(DefaultEndpoints::new("https://site.test"))
            .build()
            .unwrap();
        let sync = ItemSynchronizer::new(&ctx, ctx.gateway.clone(), "bob", CollectionType::Favorites);

        let link = ItemSummary::new("fav-1").with_target("1005");
        let rec = sync.reconcile(&link, None).await;
        let item = rec.staged.unwrap();

        assert_eq!(item.id, ItemId::from("fav-1"));
        assert_eq!(item.owner, "bob");
        assert_eq!(item.author, "alice");
        assert_eq!(item.target_id, Some(ItemId::from("1005")));
        assert_eq!(remote.requests(), vec!["https://site.test/view/1005/".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_predicts_without_fetching() {
        let remote = Arc::new(Remote::default());
        let sync = synchronizer(
            remote.clone(),
            SyncConfig {
                dry_run: true,
                ..SyncConfig::default()
            },
        );

        let rec = sync.reconcile(&ItemSummary::new("1"), None).await;
        assert_eq!(rec.outcome, SyncOutcome::Created(ItemId::from("1")));
        assert!(rec.staged.is_none());
        assert!(remote.requests().is_empty());
    }

    #[tokio::test]
    async fn test_by_id_skips_stored_unless_replacing() {
        let remote = Arc::new(Remote::default());
        remote.detail("7", "Original", None);
        let sync = synchronizer(remote.clone(), SyncConfig::default());

        let id = ItemId::from("7");
        let rec = sync.reconcile_by_id(&id, None, false).await;
        assert_eq!(rec.outcome, SyncOutcome::Created(id.clone()));
        let stored = Item {
            surrogate: Some("v1".into()),
            ..rec.staged.unwrap()
        };

        let before = remote.requests().len();
        let rec = sync.reconcile_by_id(&id, Some(&stored), false).await;
        assert_eq!(rec.outcome, SyncOutcome::Unchanged(id.clone()));
        assert_eq!(remote.requests().len(), before);

        remote.detail("7", "Edited", None);
        let rec = sync.reconcile_by_id(&id, Some(&stored), true).await;
        assert_eq!(rec.outcome, SyncOutcome::Updated(id.clone()));
        assert_eq!(remote.requests().len(), before + 1);
        let staged = rec.staged.unwrap();
        assert_eq!(staged.title, "Edited");
        assert_eq!(staged.surrogate.as_deref(), Some("v1"));
        assert_eq!(staged.first_seen_at, stored.first_seen_at);
    }
}
