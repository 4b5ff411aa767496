//! Archive configuration.
//!
//! Loaded from a JSON document; every section is optional.
//!
//! ```json
//! {
//!   "base_url": "https://gallery.example",
//!   "credentials": { "cookies": { "a": "...", "b": "..." } },
//!   "scheduler": { "workers": 2, "rate_limit": { "global_interval_ms": 1500 } },
//!   "sync": { "stop_streak": 3 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use galleria_sync::{Credentials, SchedulerConfig, SyncConfig};

use crate::error::{ArchiveError, Result};

/// Default site root.
pub const DEFAULT_BASE_URL: &str = "https://www.furaffinity.net";

/// Configuration for an [`Archive`](crate::Archive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Site root that listing and detail URLs are built on.
    pub base_url: String,
    /// Session credentials sent with every request.
    pub credentials: Credentials,
    /// Worker pool, rate limits and retries.
    pub scheduler: SchedulerConfig,
    /// Pass behavior.
    pub sync: SyncConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: Credentials::default(),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ArchiveError::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ArchiveError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(ArchiveConfig::from_json("{}").unwrap(), ArchiveConfig::default());
    }

    #[test]
    fn test_nested_sections() {
        let config = ArchiveConfig::from_json(
            r#"{
                "base_url": "https://site.test",
                "credentials": {"cookies": {"a": "1", "b": "2"}},
                "scheduler": {"workers": 2, "rate_limit": {"global_interval_ms": 1500}},
                "sync": {"stop_streak": 3, "dry_run": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://site.test");
        assert_eq!(config.credentials.cookies.len(), 2);
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.rate_limit.global_interval_ms, 1500);
        assert_eq!(config.scheduler.rate_limit.per_owner_interval_ms, 2000);
        assert_eq!(config.sync.stop_streak, 3);
        assert!(config.sync.dry_run);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ArchiveConfig::from_json("{\"scheduler\": 4}"),
            Err(ArchiveError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        std::fs::write(&path, r#"{"scheduler": {"workers": 8}}"#).unwrap();

        assert_eq!(ArchiveConfig::load(&path).unwrap().scheduler.workers, 8);
        assert!(ArchiveConfig::load(dir.path().join("missing.json")).is_err());
    }
}
