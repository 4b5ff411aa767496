//! Pass-level configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconcile::UnknownSurrogate;

/// Configuration for collection passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Consecutive unchanged items, counted from the previous pass's newest
    /// item, after which an incremental pass stops. Values below 1 count
    /// as 1, so the previous newest item must itself be unchanged.
    pub stop_streak: usize,
    /// Predict outcomes without fetching details or writing anything.
    pub dry_run: bool,
    /// What to do when a listing entry's change marker cannot be compared.
    pub unknown_surrogate: UnknownSurrogate,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// Fetch and store the main file and thumbnail of each item.
    pub download_assets: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stop_streak: 2,
            dry_run: false,
            unknown_surrogate: UnknownSurrogate::AssumeUnchanged,
            request_timeout_ms: 30_000,
            download_assets: true,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.stop_streak, 2);
        assert!(!config.dry_run);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"stop_streak": 5, "unknown_surrogate": "refetch"}"#).unwrap();
        assert_eq!(config.stop_streak, 5);
        assert_eq!(config.unknown_surrogate, UnknownSurrogate::Refetch);
        assert!(config.download_assets);
    }
}
