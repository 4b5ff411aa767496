//! Pagination tokens and restartable cursor positions.
//!
//! A [`CursorState`] is everything needed to continue a listing traversal
//! without re-fetching pages that were already consumed. It is stored in
//! watermark checkpoints as CBOR.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Position of a page within a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageToken {
    /// Numbered pages (1-indexed).
    Number(u32),
    /// Site-provided continuation token.
    Opaque(String),
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageToken::Number(n) => write!(f, "{}", n),
            PageToken::Opaque(s) => f.write_str(s),
        }
    }
}

/// A restartable position in a listing traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Token of the next page to fetch.
    pub token: PageToken,
    /// Entries of that page already consumed.
    pub position: usize,
    /// 1-indexed ordinal of that page within the traversal.
    pub page_number: u32,
}

impl CursorState {
    /// Start of a traversal.
    pub fn start(token: PageToken) -> Self {
        Self {
            token,
            position: 0,
            page_number: 1,
        }
    }

    /// Position at the beginning of the page after the current one.
    pub fn next_page(&self, token: PageToken) -> Self {
        Self {
            token,
            position: 0,
            page_number: self.page_number + 1,
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn token() -> impl Strategy<Value = PageToken> {
        prop_oneof![
            (1u32..10_000).prop_map(PageToken::Number),
            "[a-z0-9/]{1,24}".prop_map(PageToken::Opaque),
        ]
    }

    #[test]
    fn test_next_page_resets_position() {
        let state = CursorState {
            token: PageToken::Number(3),
            position: 7,
            page_number: 3,
        };
        let next = state.next_page(PageToken::Number(4));
        assert_eq!(next.position, 0);
        assert_eq!(next.page_number, 4);
    }

    #[test]
    fn test_token_json_is_untagged() {
        let n: PageToken = serde_json::from_str("2").unwrap();
        let s: PageToken = serde_json::from_str("\"/fav/123/next\"").unwrap();
        assert_eq!(n, PageToken::Number(2));
        assert_eq!(s, PageToken::Opaque("/fav/123/next".into()));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(CursorState::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }

    proptest! {
        #[test]
        fn test_cursor_state_survives_encoding(t in token(), position in 0usize..100, page in 1u32..500) {
            let state = CursorState { token: t, position, page_number: page };
            let decoded = CursorState::from_bytes(&state.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, state);
        }
    }
}
