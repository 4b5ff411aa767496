//! Items: the archived units, and the listing/detail views they are built from.
//!
//! A listing page yields cheap [`ItemSummary`] values; fetching an item's own
//! page yields a [`DetailRecord`]. An [`Item`] is what the store keeps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::cursor::PageToken;
use crate::error::CoreError;
use crate::revision::RevisionHash;
use crate::types::{BlobId, CollectionType, ItemId};

/// Lifecycle of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Present upstream as of the last pass that saw it.
    Active,
    /// Not observed by a completed full pass.
    Removed,
}

impl ItemStatus {
    /// Stable name used in database rows.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Removed => "removed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ItemStatus::Active),
            "removed" => Ok(ItemStatus::Removed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    /// Remote identifier.
    pub id: ItemId,
    /// Cheap change marker exposed by the listing, if the site provides one.
    #[serde(default)]
    pub surrogate: Option<String>,
    /// Title as shown on the listing.
    #[serde(default)]
    pub title: Option<String>,
    /// For favorite links: the submission the link points at.
    #[serde(default)]
    pub target_id: Option<ItemId>,
    /// Listing thumbnail, used when the detail page has none.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl ItemSummary {
    /// A summary with only an id.
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            surrogate: None,
            title: None,
            target_id: None,
            thumbnail_url: None,
        }
    }

    /// Attach a change marker.
    pub fn with_surrogate(mut self, surrogate: impl Into<String>) -> Self {
        self.surrogate = Some(surrogate.into());
        self
    }

    /// Attach a favorite-link target.
    pub fn with_target(mut self, target: impl Into<ItemId>) -> Self {
        self.target_id = Some(target.into());
        self
    }

    /// The id whose detail page describes this entry.
    pub fn detail_id(&self) -> &ItemId {
        self.target_id.as_ref().unwrap_or(&self.id)
    }
}

/// One parsed listing page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListingPage {
    /// Entries, most recent first.
    pub items: Vec<ItemSummary>,
    /// Token of the following page, `None` at the end of the collection.
    #[serde(default)]
    pub next: Option<PageToken>,
}

/// The full detail of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    /// Remote identifier of the detail page (the submission for favorites).
    pub id: ItemId,
    /// Account that posted the content.
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Main binary asset.
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Remote posting time (Unix ms).
    #[serde(default)]
    pub posted_at: Option<i64>,
}

impl DetailRecord {
    /// Fingerprint of the tracked mutable fields.
    pub fn revision_hash(&self) -> RevisionHash {
        RevisionHash::compute(
            &self.title,
            &self.description,
            &normalize_tags(&self.tags),
            self.file_url.as_deref(),
        )
    }
}

/// An archived item as persisted by the store.
///
/// `(id, collection)` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Account whose collection this item belongs to.
    pub owner: String,
    pub collection: CollectionType,
    /// Account that posted the content (differs from `owner` for favorites).
    pub author: String,
    pub title: String,
    pub description: String,
    /// Normalized tag list.
    pub tags: Vec<String>,
    pub file_url: Option<String>,
    pub revision_hash: RevisionHash,
    /// Main asset in the blob store.
    pub blob_id: Option<BlobId>,
    pub thumbnail_blob_id: Option<BlobId>,
    /// Last listing-level change marker seen for this item.
    pub surrogate: Option<String>,
    /// For favorite links: the submission being pointed at.
    pub target_id: Option<ItemId>,
    pub posted_at: Option<i64>,
    pub first_seen_at: i64,
    pub last_updated_at: i64,
    pub status: ItemStatus,
}

impl Item {
    /// Build a new item from its listing summary and fetched detail.
    pub fn from_detail(
        owner: &str,
        collection: CollectionType,
        summary: &ItemSummary,
        detail: &DetailRecord,
        now: i64,
    ) -> Self {
        Self {
            id: summary.id.clone(),
            owner: owner.to_string(),
            collection,
            author: detail.author.clone(),
            title: detail.title.clone(),
            description: detail.description.clone(),
            tags: normalize_tags(&detail.tags),
            file_url: detail.file_url.clone(),
            revision_hash: detail.revision_hash(),
            blob_id: None,
            thumbnail_blob_id: None,
            surrogate: summary.surrogate.clone(),
            target_id: summary.target_id.clone(),
            posted_at: detail.posted_at,
            first_seen_at: now,
            last_updated_at: now,
            status: ItemStatus::Active,
        }
    }

    /// Replace the mutable fields with a newer detail, keeping identity and
    /// first-seen time. The caller decides whether the blobs are still valid.
    pub fn with_detail(&self, summary: &ItemSummary, detail: &DetailRecord, now: i64) -> Self {
        Self {
            author: detail.author.clone(),
            title: detail.title.clone(),
            description: detail.description.clone(),
            tags: normalize_tags(&detail.tags),
            file_url: detail.file_url.clone(),
            revision_hash: detail.revision_hash(),
            surrogate: summary.surrogate.clone(),
            target_id: summary.target_id.clone().or_else(|| self.target_id.clone()),
            posted_at: detail.posted_at.or(self.posted_at),
            last_updated_at: now,
            status: ItemStatus::Active,
            ..self.clone()
        }
    }

    /// Whether the item is currently active.
    pub fn is_active(&self) -> bool {
        self.status == ItemStatus::Active
    }
}

/// Normalize a tag list: trim, lowercase, drop empties, sort, dedupe.
///
/// Tag order on the remote page is not meaningful, so reordering alone
/// must not produce a new revision.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> DetailRecord {
        DetailRecord {
            id: ItemId::from("1005"),
            author: "alice".into(),
            title: "Sunset".into(),
            description: "Painted at dusk".into(),
            tags: vec!["Sky".into(), "orange".into(), " sky ".into()],
            file_url: Some("https://cdn.test/1005.png".into()),
            thumbnail_url: None,
            posted_at: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn test_item_status_parses_known_values_only() {
        for status in [ItemStatus::Active, ItemStatus::Removed] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!(matches!(
            "archived".parse::<ItemStatus>(),
            Err(CoreError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec!["B".to_string(), "a".into(), " b".into(), "".into()];
        assert_eq!(normalize_tags(&tags), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_from_detail_sets_times_and_hash() {
        let summary = ItemSummary::new("1005").with_surrogate("v1");
        let item = Item::from_detail("alice", CollectionType::Gallery, &summary, &detail(), 42);

        assert_eq!(item.first_seen_at, 42);
        assert_eq!(item.last_updated_at, 42);
        assert_eq!(item.tags, vec!["orange".to_string(), "sky".to_string()]);
        assert_eq!(item.revision_hash, detail().revision_hash());
        assert_eq!(item.surrogate.as_deref(), Some("v1"));
        assert!(item.is_active());
    }

    #[test]
    fn test_with_detail_keeps_first_seen() {
        let summary = ItemSummary::new("1005");
        let item = Item::from_detail("alice", CollectionType::Gallery, &summary, &detail(), 42);

        let mut edited = detail();
        edited.title = "Sunset (revised)".into();
        let updated = item.with_detail(&summary.clone().with_surrogate("v2"), &edited, 99);

        assert_eq!(updated.first_seen_at, 42);
        assert_eq!(updated.last_updated_at, 99);
        assert_ne!(updated.revision_hash, item.revision_hash);
        assert_eq!(updated.surrogate.as_deref(), Some("v2"));
    }

    #[test]
    fn test_detail_id_prefers_target() {
        let link = ItemSummary::new("fav-77").with_target("1005");
        assert_eq!(link.detail_id(), &ItemId::from("1005"));
        assert_eq!(ItemSummary::new("9").detail_id(), &ItemId::from("9"));
    }

    #[test]
    fn test_summary_deserializes_with_missing_fields() {
        let summary: ItemSummary = serde_json::from_str(r#"{"id":"12"}"#).unwrap();
        assert_eq!(summary, ItemSummary::new("12"));
    }
}
