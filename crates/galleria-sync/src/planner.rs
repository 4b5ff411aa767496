//! Collection passes: driving a cursor and a synchronizer over one
//! (owner, collection) pair.
//!
//! ## Pass Modes
//!
//! - **Full**: walk to the end of the collection. Every active item is
//!   marked as a removal candidate when the pass starts; committed pages
//!   clear the mark of every item they contain; when the walk completes,
//!   the remaining candidates are marked removed in the same transaction
//!   as the final watermark.
//! - **Incremental**: walk from the newest page and stop once the newest
//!   item of the previous pass has been seen and the current run of
//!   unchanged items (which includes it) reaches the configured streak.
//!
//! ## Commit Protocol
//!
//! Pages are reconciled one at a time. A page's staged items, the ids it
//! observed and the advanced checkpoint are committed atomically, and only
//! once every item of the page reconciled. A page error, an item that
//! failed for a retryable reason or cancellation aborts the pass before
//! that commit, so the stored watermark always describes fully committed
//! pages. An item that failed permanently (gone upstream, unparseable) is
//! reported as failed and skipped; its page still commits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use galleria_core::{
    now_millis, CollectionType, CollectionWatermark, ItemId, OutcomeTally, PassCheckpoint,
    PassMode, SyncOutcome,
};
use galleria_store::{PageCommit, PassCompletion};

use crate::context::SyncContext;
use crate::cursor::PageCursor;
use crate::error::{FailureClass, SyncError};
use crate::reconcile::ItemSynchronizer;

/// How a successful pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassEnd {
    /// The last page of the collection was processed.
    EndOfCollection,
    /// An incremental pass reached previously synced items.
    CaughtUp,
}

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub owner: String,
    pub collection: CollectionType,
    pub mode: PassMode,
    /// Whether the pass continued from a checkpoint.
    pub resumed: bool,
    /// Pages committed by this invocation.
    pub pages_committed: u32,
    /// Outcomes of committed pages.
    pub tally: OutcomeTally,
    pub end: Option<PassEnd>,
    /// The stored watermark after this invocation.
    pub watermark: CollectionWatermark,
}

/// Where and why a pass stopped early.
#[derive(Debug)]
pub struct PassFailure {
    /// Page the pass stopped on (1-indexed, 0 before the first page).
    pub page: u32,
    /// Item that failed, if the failure was item-level.
    pub item: Option<ItemId>,
    pub error: SyncError,
    /// What was committed before the failure.
    pub report: PassReport,
}

impl std::fmt::Display for PassFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} stopped at page {}",
            self.report.owner, self.report.collection, self.page
        )?;
        if let Some(item) = &self.item {
            write!(f, ", item {}", item)?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Runs passes for any (owner, collection) pair.
pub struct CollectionSyncPlanner {
    ctx: Arc<SyncContext>,
}

/// Resolved starting point of a pass.
struct PassStart {
    mode: PassMode,
    checkpoint: PassCheckpoint,
    resumed: bool,
}

impl CollectionSyncPlanner {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Run (or resume) a pass over one collection.
    ///
    /// `force_full` starts a full pass even if a full pass completed
    /// before; a full pass in progress is resumed either way. Cancelling
    /// `cancel` stops the pass at the next suspension point without
    /// committing the current page.
    pub async fn run(
        &self,
        owner: &str,
        collection: CollectionType,
        force_full: bool,
        cancel: CancellationToken,
    ) -> Result<PassReport, PassFailure> {
        let store = &self.ctx.store;
        let config = &self.ctx.config;

        let mut report = PassReport {
            owner: owner.to_string(),
            collection,
            mode: PassMode::Incremental,
            resumed: false,
            pages_committed: 0,
            tally: OutcomeTally::default(),
            end: None,
            watermark: CollectionWatermark::empty(owner, collection),
        };

        let mut watermark = match store.get_watermark(owner, collection).await {
            Ok(wm) => wm,
            Err(e) => {
                return Err(PassFailure {
                    page: 0,
                    item: None,
                    error: e.into(),
                    report,
                })
            }
        };
        report.watermark = watermark.clone();

        let start = self.resolve_start(&watermark, collection, force_full);
        report.mode = start.mode;
        report.resumed = start.resumed;

        tracing::info!(
            mode = ?start.mode,
            resumed = start.resumed,
            page = start.checkpoint.cursor.page_number,
            "pass started"
        );

        if start.mode == PassMode::Full && !start.resumed && !config.dry_run {
            match store.begin_removal_scan(owner, collection).await {
                Ok(candidates) => tracing::debug!(candidates, "removal scan started"),
                Err(e) => {
                    return Err(PassFailure {
                        page: 0,
                        item: None,
                        error: e.into(),
                        report,
                    })
                }
            }
        }

        let gateway = self.ctx.gateway.with_cancellation(cancel.clone());
        let synchronizer = ItemSynchronizer::new(&self.ctx, gateway.clone(), owner, collection);
        let mut cursor = PageCursor::resume(
            owner,
            collection,
            start.checkpoint.cursor.clone(),
            gateway,
            self.ctx.endpoints.clone(),
            self.ctx.extractor.clone(),
        );

        let marker = watermark.last_synced_item_id.clone();
        let mut checkpoint = start.checkpoint;
        let mut streak = 0usize;
        let mut marker_seen = false;
        let mut end = PassEnd::EndOfCollection;

        loop {
            if cancel.is_cancelled() {
                return Err(PassFailure {
                    page: cursor.page_number().unwrap_or(0),
                    item: None,
                    error: SyncError::Cancelled,
                    report,
                });
            }

            let page = match cursor.next().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(page = e.page, error = %e.error, "page failed");
                    return Err(PassFailure {
                        page: e.page,
                        item: None,
                        error: e.error,
                        report,
                    });
                }
            };

            if checkpoint.head_item_id.is_none() {
                checkpoint.head_item_id = page.items.first().map(|s| s.id.clone());
            }

            let mut tally = OutcomeTally::default();
            let mut upserts = Vec::new();
            let mut seen = Vec::with_capacity(page.items.len());
            let mut caught_up = false;

            for summary in &page.items {
                let stored = match store.get_item(collection, &summary.id).await {
                    Ok(stored) => stored,
                    Err(e) => {
                        return Err(PassFailure {
                            page: page.number,
                            item: Some(summary.id.clone()),
                            error: e.into(),
                            report,
                        })
                    }
                };

                let rec = synchronizer.reconcile(summary, stored.as_ref()).await;
                if let Some(error) = rec.error {
                    if error.class() != FailureClass::Permanent {
                        tracing::warn!(page = page.number, id = %summary.id, %error, "item failed, page not committed");
                        report.tally.record(&rec.outcome);
                        return Err(PassFailure {
                            page: page.number,
                            item: Some(summary.id.clone()),
                            error: error.for_item(summary.id.clone()),
                            report,
                        });
                    }
                    // Retrying cannot help; skip the item and keep the page
                    tracing::warn!(page = page.number, id = %summary.id, %error, "item skipped");
                    tally.record(&rec.outcome);
                    seen.push(summary.id.clone());
                    streak = 0;
                    continue;
                }

                tally.record(&rec.outcome);
                if rec.asset_errors.file {
                    tally.file_errors.push(summary.id.clone());
                }
                if rec.asset_errors.thumbnail {
                    tally.thumbnail_errors.push(summary.id.clone());
                }
                seen.push(summary.id.clone());
                upserts.extend(rec.staged);

                if start.mode == PassMode::Incremental {
                    streak = match rec.outcome {
                        SyncOutcome::Unchanged(_) => streak + 1,
                        _ => 0,
                    };
                    marker_seen |= marker.as_ref() == Some(&summary.id);
                    if marker_seen && streak >= config.stop_streak.max(1) {
                        caught_up = true;
                        break;
                    }
                }
            }

            checkpoint.pages_committed += 1;
            checkpoint.cursor = page.resume.clone().unwrap_or_else(|| page.state.clone());
            watermark.advance(checkpoint.clone());

            if !config.dry_run {
                let commit = PageCommit {
                    upserts,
                    seen,
                    watermark: watermark.clone(),
                };
                if let Err(e) = store.commit_page(&commit).await {
                    return Err(PassFailure {
                        page: page.number,
                        item: None,
                        error: e.into(),
                        report,
                    });
                }
                report.watermark = watermark.clone();
            }

            tracing::debug!(
                page = page.number,
                created = tally.created.len(),
                updated = tally.updated.len(),
                unchanged = tally.unchanged,
                "page committed"
            );
            report.pages_committed += 1;
            report.tally.merge(tally);

            if caught_up {
                end = PassEnd::CaughtUp;
                break;
            }
            if page.resume.is_none() {
                break;
            }
        }

        let now = now_millis();
        watermark.complete(
            start.mode,
            checkpoint.head_item_id.clone(),
            checkpoint.pages_committed,
            now,
        );

        if !config.dry_run {
            let completion = PassCompletion {
                watermark: watermark.clone(),
                sweep: start.mode == PassMode::Full && end == PassEnd::EndOfCollection,
                now,
            };
            match store.finish_pass(&completion).await {
                Ok(removed) => {
                    for id in removed {
                        report.tally.record(&SyncOutcome::Removed(id));
                    }
                }
                Err(e) => {
                    return Err(PassFailure {
                        page: checkpoint.cursor.page_number,
                        item: None,
                        error: e.into(),
                        report,
                    })
                }
            }
            report.watermark = watermark;
        }

        report.end = Some(end);
        tracing::info!(
            pages = report.pages_committed,
            created = report.tally.created.len(),
            updated = report.tally.updated.len(),
            removed = report.tally.removed.len(),
            end = ?end,
            "pass finished"
        );
        Ok(report)
    }

    /// Fetch the named items of one collection, outside of any pass.
    ///
    /// Stored items are skipped unless `replace` is set. Each item is
    /// upserted on its own; the watermark is not touched. Items that fail
    /// are tallied and skipped, while cancellation, a disabled account and
    /// store failures stop the run.
    pub async fn fetch_items(
        &self,
        owner: &str,
        collection: CollectionType,
        ids: &[ItemId],
        replace: bool,
        cancel: CancellationToken,
    ) -> crate::error::Result<OutcomeTally> {
        let store = &self.ctx.store;
        let gateway = self.ctx.gateway.with_cancellation(cancel.clone());
        let synchronizer = ItemSynchronizer::new(&self.ctx, gateway, owner, collection);
        let mut tally = OutcomeTally::default();

        for id in ids {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let stored = store.get_item(collection, id).await?;
            let rec = synchronizer
                .reconcile_by_id(id, stored.as_ref(), replace)
                .await;
            if let Some(error) = rec.error {
                match error.class() {
                    FailureClass::Permanent | FailureClass::Transient => {
                        tracing::warn!(%owner, %collection, %id, %error, "item skipped");
                        tally.record(&rec.outcome);
                        continue;
                    }
                    _ => return Err(error.for_item(id.clone())),
                }
            }

            if let Some(item) = &rec.staged {
                store.upsert(item).await?;
            }
            tally.record(&rec.outcome);
            if rec.asset_errors.file {
                tally.file_errors.push(id.clone());
            }
            if rec.asset_errors.thumbnail {
                tally.thumbnail_errors.push(id.clone());
            }
        }

        tracing::info!(
            %owner,
            %collection,
            requested = ids.len(),
            created = tally.created.len(),
            updated = tally.updated.len(),
            failed = tally.failed.len(),
            "items fetched"
        );
        Ok(tally)
    }

    fn resolve_start(
        &self,
        watermark: &CollectionWatermark,
        collection: CollectionType,
        force_full: bool,
    ) -> PassStart {
        match &watermark.checkpoint {
            Some(cp) if !(force_full && cp.mode == PassMode::Incremental) => PassStart {
                mode: cp.mode,
                checkpoint: cp.clone(),
                resumed: true,
            },
            _ => {
                let mode = if force_full {
                    PassMode::Full
                } else {
                    watermark.default_mode()
                };
                let token = self.ctx.endpoints.first_token(collection);
                PassStart {
                    mode,
                    checkpoint: PassCheckpoint {
                        mode,
                        cursor: galleria_core::CursorState::start(token),
                        head_item_id: None,
                        pages_committed: 0,
                        started_at: now_millis(),
                    },
                    resumed: false,
                }
            }
        }
    }
}
