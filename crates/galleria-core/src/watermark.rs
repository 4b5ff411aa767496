//! Collection watermarks: per-collection synchronization checkpoints.
//!
//! `last_synced_item_id` is the newest item committed by the last completed
//! pass and is what an incremental pass stops at. Progress of a pass that is
//! still running lives in [`PassCheckpoint`], so an interrupted pass never
//! invalidates the stop marker of the previous one.

use serde::{Deserialize, Serialize};

use crate::cursor::CursorState;
use crate::error::CoreError;
use crate::types::{CollectionType, ItemId};

/// The kind of traversal a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassMode {
    /// Bounded traversal that stops at previously synced state.
    Incremental,
    /// Complete traversal followed by removal detection.
    Full,
}

/// Resume state of a pass that has committed at least one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCheckpoint {
    pub mode: PassMode,
    /// Where the next page starts.
    pub cursor: CursorState,
    /// Newest item of the pass (first entry of its first page).
    pub head_item_id: Option<ItemId>,
    /// Pages committed so far in this pass.
    pub pages_committed: u32,
    /// When the pass started (Unix ms).
    pub started_at: i64,
}

impl PassCheckpoint {
    /// Encode to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Synchronization checkpoint for one (owner, collection) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionWatermark {
    pub owner: String,
    pub collection: CollectionType,
    /// Pages committed by the current pass, or by the last completed one.
    pub last_synced_page: u32,
    /// Newest item committed by the last completed pass.
    pub last_synced_item_id: Option<ItemId>,
    /// Whether a full pass has ever completed.
    pub completed_full_pass: bool,
    /// When the last pass completed (Unix ms).
    pub last_sync_timestamp: Option<i64>,
    /// Progress of a pass that has not completed yet.
    pub checkpoint: Option<PassCheckpoint>,
}

impl CollectionWatermark {
    /// The watermark of a collection that has never been synced.
    pub fn empty(owner: impl Into<String>, collection: CollectionType) -> Self {
        Self {
            owner: owner.into(),
            collection,
            last_synced_page: 0,
            last_synced_item_id: None,
            completed_full_pass: false,
            last_sync_timestamp: None,
            checkpoint: None,
        }
    }

    /// The mode a fresh pass should use.
    pub fn default_mode(&self) -> PassMode {
        if self.completed_full_pass {
            PassMode::Incremental
        } else {
            PassMode::Full
        }
    }

    /// Record a committed page of an in-progress pass.
    pub fn advance(&mut self, checkpoint: PassCheckpoint) {
        self.last_synced_page = checkpoint.pages_committed;
        self.checkpoint = Some(checkpoint);
    }

    /// Record completion of a pass.
    pub fn complete(&mut self, mode: PassMode, head: Option<ItemId>, pages: u32, now: i64) {
        if head.is_some() {
            self.last_synced_item_id = head;
        }
        if mode == PassMode::Full {
            self.completed_full_pass = true;
        }
        self.last_synced_page = pages;
        self.last_sync_timestamp = Some(now);
        self.checkpoint = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::PageToken;

    fn checkpoint(pages: u32) -> PassCheckpoint {
        PassCheckpoint {
            mode: PassMode::Full,
            cursor: CursorState {
                token: PageToken::Number(pages + 1),
                position: 0,
                page_number: pages + 1,
            },
            head_item_id: Some(ItemId::from("1005")),
            pages_committed: pages,
            started_at: 1,
        }
    }

    #[test]
    fn test_default_mode() {
        let mut wm = CollectionWatermark::empty("alice", CollectionType::Gallery);
        assert_eq!(wm.default_mode(), PassMode::Full);
        wm.complete(PassMode::Full, Some(ItemId::from("1005")), 3, 10);
        assert_eq!(wm.default_mode(), PassMode::Incremental);
    }

    #[test]
    fn test_advance_keeps_stop_marker() {
        let mut wm = CollectionWatermark::empty("alice", CollectionType::Gallery);
        wm.last_synced_item_id = Some(ItemId::from("1000"));
        wm.advance(checkpoint(2));

        assert_eq!(wm.last_synced_page, 2);
        assert_eq!(wm.last_synced_item_id, Some(ItemId::from("1000")));
        assert!(wm.checkpoint.is_some());
    }

    #[test]
    fn test_complete_clears_checkpoint() {
        let mut wm = CollectionWatermark::empty("alice", CollectionType::Gallery);
        wm.advance(checkpoint(1));
        wm.complete(PassMode::Incremental, Some(ItemId::from("1005")), 1, 77);

        assert!(wm.checkpoint.is_none());
        assert!(!wm.completed_full_pass);
        assert_eq!(wm.last_synced_item_id, Some(ItemId::from("1005")));
        assert_eq!(wm.last_sync_timestamp, Some(77));
    }

    #[test]
    fn test_complete_without_head_keeps_marker() {
        let mut wm = CollectionWatermark::empty("alice", CollectionType::Gallery);
        wm.last_synced_item_id = Some(ItemId::from("1000"));
        wm.complete(PassMode::Incremental, None, 0, 5);
        assert_eq!(wm.last_synced_item_id, Some(ItemId::from("1000")));
    }

    #[test]
    fn test_checkpoint_bytes_roundtrip() {
        let cp = checkpoint(4);
        assert_eq!(PassCheckpoint::from_bytes(&cp.to_bytes().unwrap()).unwrap(), cp);
    }
}
