//! Per-item synchronization outcomes and their aggregation.

use serde::{Deserialize, Serialize};

use crate::types::ItemId;

/// What happened to one item during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// Item was new and has been archived.
    Created(ItemId),
    /// Item content changed upstream (or reappeared) and was updated.
    Updated(ItemId),
    /// Item is already archived in its current revision.
    Unchanged(ItemId),
    /// Item was not observed by a completed full pass.
    Removed(ItemId),
    /// Item could not be reconciled; nothing was written for it.
    Failed { id: ItemId, reason: String },
}

impl SyncOutcome {
    /// The item this outcome is about.
    pub fn id(&self) -> &ItemId {
        match self {
            SyncOutcome::Created(id)
            | SyncOutcome::Updated(id)
            | SyncOutcome::Unchanged(id)
            | SyncOutcome::Removed(id) => id,
            SyncOutcome::Failed { id, .. } => id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, SyncOutcome::Unchanged(_))
    }
}

/// Aggregated outcomes of one or more passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub created: Vec<ItemId>,
    pub updated: Vec<ItemId>,
    pub unchanged: usize,
    pub removed: Vec<ItemId>,
    pub failed: Vec<(ItemId, String)>,
    /// Items stored without their main asset.
    pub file_errors: Vec<ItemId>,
    /// Items stored without their thumbnail.
    pub thumbnail_errors: Vec<ItemId>,
}

impl OutcomeTally {
    /// Record one outcome.
    pub fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created(id) => self.created.push(id.clone()),
            SyncOutcome::Updated(id) => self.updated.push(id.clone()),
            SyncOutcome::Unchanged(_) => self.unchanged += 1,
            SyncOutcome::Removed(id) => self.removed.push(id.clone()),
            SyncOutcome::Failed { id, reason } => self.failed.push((id.clone(), reason.clone())),
        }
    }

    /// Fold another tally into this one.
    pub fn merge(&mut self, other: OutcomeTally) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.unchanged += other.unchanged;
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
        self.file_errors.extend(other.file_errors);
        self.thumbnail_errors.extend(other.thumbnail_errors);
    }

    /// Number of items written (created or updated).
    pub fn written(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written() == 0 && self.unchanged == 0 && self.removed.is_empty() && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_records_and_merges() {
        let mut a = OutcomeTally::default();
        a.record(&SyncOutcome::Created(ItemId::from("1")));
        a.record(&SyncOutcome::Unchanged(ItemId::from("2")));

        let mut b = OutcomeTally::default();
        b.record(&SyncOutcome::Updated(ItemId::from("3")));
        b.record(&SyncOutcome::Failed {
            id: ItemId::from("4"),
            reason: "timeout".into(),
        });

        a.merge(b);
        assert_eq!(a.written(), 2);
        assert_eq!(a.unchanged, 1);
        assert_eq!(a.failed.len(), 1);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_outcome_id() {
        let failed = SyncOutcome::Failed {
            id: ItemId::from("1004"),
            reason: "x".into(),
        };
        assert_eq!(failed.id(), &ItemId::from("1004"));
        assert!(failed.is_failed());
    }
}
