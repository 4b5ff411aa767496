//! Page extraction: turning fetched bytes into typed records.
//!
//! The synchronizer never looks at markup. It hands bytes to a
//! [`PageExtractor`] and gets back a [`ListingPage`] or a [`DetailRecord`],
//! or a [`ParseError`] tagged with the collection and page variant.

use galleria_core::{CollectionType, DetailRecord, ListingPage, ParseError};

/// Parses listing and detail pages.
pub trait PageExtractor: Send + Sync {
    /// Parse one listing page.
    fn parse_listing(
        &self,
        collection: CollectionType,
        bytes: &[u8],
    ) -> Result<ListingPage, ParseError>;

    /// Parse one detail page.
    fn parse_detail(
        &self,
        collection: CollectionType,
        bytes: &[u8],
    ) -> Result<DetailRecord, ParseError>;
}

/// Extractor for the JSON rendition of the site's pages.
///
/// A listing page is `{"items": [{"id": .., "surrogate": ..}, ..], "next": ..}`
/// where `next` is a page number, a token string, or absent at the end.
/// A detail page is a serialized [`DetailRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl PageExtractor for JsonExtractor {
    fn parse_listing(
        &self,
        collection: CollectionType,
        bytes: &[u8],
    ) -> Result<ListingPage, ParseError> {
        let page: ListingPage = serde_json::from_slice(bytes)
            .map_err(|e| ParseError::listing(collection, e.to_string()))?;

        if let Some(entry) = page.items.iter().find(|s| s.id.as_str().is_empty()) {
            return Err(ParseError::listing(
                collection,
                format!("entry with empty id (title {:?})", entry.title),
            ));
        }

        Ok(page)
    }

    fn parse_detail(
        &self,
        collection: CollectionType,
        bytes: &[u8],
    ) -> Result<DetailRecord, ParseError> {
        let detail: DetailRecord = serde_json::from_slice(bytes)
            .map_err(|e| ParseError::detail(collection, e.to_string()))?;

        if detail.id.as_str().is_empty() {
            return Err(ParseError::detail(collection, "missing id"));
        }
        if detail.author.is_empty() {
            return Err(ParseError::detail(collection, "missing author"));
        }

        Ok(detail)
    }
}
