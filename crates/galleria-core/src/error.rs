//! Error types for Galleria Core.

use thiserror::Error;

use crate::types::CollectionType;

/// Core errors raised by encoding and decoding helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("unknown collection type: {0}")]
    UnknownCollection(String),

    #[error("unknown item status: {0}")]
    UnknownStatus(String),
}

/// A page could not be turned into a typed record.
///
/// Parse errors are permanent for the page they occurred on: retrying the
/// same bytes yields the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse {what} page for {collection}: {message}")]
pub struct ParseError {
    /// The collection whose page was being parsed.
    pub collection: CollectionType,
    /// Which page variant was expected ("listing" or "detail").
    pub what: &'static str,
    /// Extractor-specific description.
    pub message: String,
}

impl ParseError {
    /// A listing page failed to parse.
    pub fn listing(collection: CollectionType, message: impl Into<String>) -> Self {
        Self {
            collection,
            what: "listing",
            message: message.into(),
        }
    }

    /// A detail page failed to parse.
    pub fn detail(collection: CollectionType, message: impl Into<String>) -> Self {
        Self {
            collection,
            what: "detail",
            message: message.into(),
        }
    }
}
