//! Strong type definitions for Galleria.
//!
//! Identifiers are newtypes to prevent mixing item ids, blob ids and
//! account handles at compile time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A stable remote identifier, unique per collection type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create an item id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content address of a blob: hex-encoded Blake3 of its bytes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    /// Compute the content address of the given bytes.
    pub fn for_content(data: &[u8]) -> Self {
        Self(hex::encode(blake3::hash(data).as_bytes()))
    }

    /// Borrow the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "BlobId({})", short)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of remote collection an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Gallery,
    Scraps,
    Favorites,
    Journals,
}

impl CollectionType {
    /// All collection types, in the order an update visits them.
    pub const ALL: [CollectionType; 4] = [
        CollectionType::Gallery,
        CollectionType::Scraps,
        CollectionType::Favorites,
        CollectionType::Journals,
    ];

    /// Stable lowercase name, used in URLs and database rows.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Gallery => "gallery",
            CollectionType::Scraps => "scraps",
            CollectionType::Favorites => "favorites",
            CollectionType::Journals => "journals",
        }
    }

    /// Whether entries of this collection carry a binary asset.
    pub const fn has_files(&self) -> bool {
        !matches!(self, CollectionType::Journals)
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gallery" => Ok(CollectionType::Gallery),
            "scraps" => Ok(CollectionType::Scraps),
            "favorites" => Ok(CollectionType::Favorites),
            "journals" => Ok(CollectionType::Journals),
            other => Err(CoreError::UnknownCollection(other.to_string())),
        }
    }
}

/// A remote account registered for mirroring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Account handle on the remote site.
    pub handle: String,
    /// Collections to mirror for this account.
    pub collections: BTreeSet<CollectionType>,
    /// False once the remote account has been found disabled.
    pub active: bool,
}

impl Owner {
    /// Register an owner that mirrors the given collections.
    pub fn new(handle: impl Into<String>, collections: impl IntoIterator<Item = CollectionType>) -> Self {
        Self {
            handle: handle.into(),
            collections: collections.into_iter().collect(),
            active: true,
        }
    }
}
