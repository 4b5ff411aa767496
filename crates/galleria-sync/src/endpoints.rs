//! URL construction for listing and detail pages.

use galleria_core::{CollectionType, ItemId, PageToken};

/// Where the pages of the remote site live.
pub trait Endpoints: Send + Sync {
    /// Token of the first (newest) listing page of a collection.
    fn first_token(&self, collection: CollectionType) -> PageToken;

    /// URL of one listing page.
    fn listing_url(&self, owner: &str, collection: CollectionType, token: &PageToken) -> String;

    /// URL of an item's detail page.
    fn detail_url(&self, collection: CollectionType, id: &ItemId) -> String;
}

/// The site's standard URL layout.
///
/// Galleries, scraps and journals are numbered from 1. Favorites are
/// chained through "next" tokens, starting from the bare listing path.
#[derive(Debug, Clone)]
pub struct DefaultEndpoints {
    base: String,
}

impl DefaultEndpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl Endpoints for DefaultEndpoints {
    fn first_token(&self, collection: CollectionType) -> PageToken {
        match collection {
            CollectionType::Favorites => PageToken::Opaque("/".into()),
            _ => PageToken::Number(1),
        }
    }

    fn listing_url(&self, owner: &str, collection: CollectionType, token: &PageToken) -> String {
        match token {
            PageToken::Number(n) => format!("{}/{}/{}/{}/", self.base, collection, owner, n),
            PageToken::Opaque(next) => format!(
                "{}/{}/{}/{}",
                self.base,
                collection,
                owner,
                next.trim_start_matches('/')
            ),
        }
    }

    fn detail_url(&self, collection: CollectionType, id: &ItemId) -> String {
        match collection {
            CollectionType::Journals => format!("{}/journal/{}/", self.base, id),
            _ => format!("{}/view/{}/", self.base, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_listing_urls() {
        let ep = DefaultEndpoints::new("https://site.test/");
        let first = ep.first_token(CollectionType::Gallery);
        assert_eq!(first, PageToken::Number(1));
        assert_eq!(
            ep.listing_url("alice", CollectionType::Gallery, &first),
            "https://site.test/gallery/alice/1/"
        );
        assert_eq!(
            ep.listing_url("alice", CollectionType::Journals, &PageToken::Number(3)),
            "https://site.test/journals/alice/3/"
        );
    }

    #[test]
    fn test_favorites_use_next_tokens() {
        let ep = DefaultEndpoints::new("https://site.test");
        let first = ep.first_token(CollectionType::Favorites);
        assert_eq!(
            ep.listing_url("alice", CollectionType::Favorites, &first),
            "https://site.test/favorites/alice/"
        );
        assert_eq!(
            ep.listing_url(
                "alice",
                CollectionType::Favorites,
                &PageToken::Opaque("/1234/next".into())
            ),
            "https://site.test/favorites/alice/1234/next"
        );
    }

    #[test]
    fn test_detail_urls() {
        let ep = DefaultEndpoints::new("https://site.test");
        assert_eq!(
            ep.detail_url(CollectionType::Favorites, &ItemId::from("1005")),
            "https://site.test/view/1005/"
        );
        assert_eq!(
            ep.detail_url(CollectionType::Journals, &ItemId::from("77")),
            "https://site.test/journal/77/"
        );
    }
}
