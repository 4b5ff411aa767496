//! Revision hashing over a canonical CBOR encoding.
//!
//! The tracked fields are encoded as a CBOR map with small integer keys in
//! ascending order, definite lengths, and no floats. The same field values
//! therefore always produce the same bytes, and the same hash.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain separator mixed into every revision hash.
const REVISION_DOMAIN: &[u8] = b"galleria-revision-v0:";

/// Field keys (integer keys for compact encoding).
mod keys {
    pub const TITLE: u64 = 0;
    pub const DESCRIPTION: u64 = 1;
    pub const TAGS: u64 = 2;
    pub const FILE_URL: u64 = 3;
}

/// A 32-byte Blake3 fingerprint of an item's mutable fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionHash(pub [u8; 32]);

impl RevisionHash {
    /// Compute the revision hash of the tracked fields.
    ///
    /// `tags` are expected to be normalized already.
    pub fn compute(title: &str, description: &str, tags: &[String], file_url: Option<&str>) -> Self {
        let encoded = canonical_revision_bytes(title, description, tags, file_url);

        let mut hasher = blake3::Hasher::new();
        hasher.update(REVISION_DOMAIN);
        hasher.update(&encoded);
        Self(*hasher.finalize().as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// The zero hash (sentinel).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for RevisionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for RevisionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Encode the tracked fields to canonical CBOR bytes.
pub fn canonical_revision_bytes(
    title: &str,
    description: &str,
    tags: &[String],
    file_url: Option<&str>,
) -> Vec<u8> {
    let file_value = match file_url {
        Some(url) => Value::Text(url.to_string()),
        None => Value::Null,
    };

    // Entries already in key order
    let value = Value::Map(vec![
        (Value::Integer(keys::TITLE.into()), Value::Text(title.to_string())),
        (
            Value::Integer(keys::DESCRIPTION.into()),
            Value::Text(description.to_string()),
        ),
        (
            Value::Integer(keys::TAGS.into()),
            Value::Array(tags.iter().map(|t| Value::Text(t.clone())).collect()),
        ),
        (Value::Integer(keys::FILE_URL.into()), file_value),
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&value, &mut buf).expect("CBOR encoding into a Vec is infallible");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hex_roundtrip() {
        let hash = RevisionHash::compute("t", "d", &[], None);
        assert_eq!(RevisionHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(RevisionHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_file_reference_is_tracked() {
        let a = RevisionHash::compute("t", "d", &[], None);
        let b = RevisionHash::compute("t", "d", &[], Some("https://cdn.test/a.png"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // Moving text between fields must change the hash
        let a = RevisionHash::compute("ab", "c", &[], None);
        let b = RevisionHash::compute("a", "bc", &[], None);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn test_hash_is_deterministic(
            title in ".{0,40}",
            description in ".{0,80}",
            tags in prop::collection::vec("[a-z]{1,8}", 0..6),
            file in prop::option::of("[a-z/:.]{1,30}"),
        ) {
            let h1 = RevisionHash::compute(&title, &description, &tags, file.as_deref());
            let h2 = RevisionHash::compute(&title, &description, &tags, file.as_deref());
            prop_assert_eq!(h1, h2);
        }

        #[test]
        fn test_title_change_changes_hash(
            title in "[a-z]{1,20}",
            other in "[a-z]{1,20}",
        ) {
            prop_assume!(title != other);
            let h1 = RevisionHash::compute(&title, "", &[], None);
            let h2 = RevisionHash::compute(&other, "", &[], None);
            prop_assert_ne!(h1, h2);
        }
    }
}
