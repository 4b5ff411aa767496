//! Paginated traversal of one remote listing.
//!
//! A [`PageCursor`] walks an owner's collection page by page, newest first.
//! Its position is a [`CursorState`], which the planner stores in the
//! watermark checkpoint so an interrupted pass continues where it left off.

use std::sync::Arc;

use galleria_core::{CollectionType, CursorState, ItemSummary};

use crate::endpoints::Endpoints;
use crate::error::PageFetchError;
use crate::extractor::PageExtractor;
use crate::fetch::FetchGateway;

/// One page produced by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// 1-indexed ordinal within the traversal.
    pub number: u32,
    /// Entries of the page not consumed before, newest first.
    pub items: Vec<ItemSummary>,
    /// The position this page was fetched from.
    pub state: CursorState,
    /// Where the traversal continues, `None` after the last page.
    pub resume: Option<CursorState>,
}

/// Lazy, restartable traversal of one listing.
pub struct PageCursor {
    owner: String,
    collection: CollectionType,
    state: Option<CursorState>,
    gateway: FetchGateway,
    endpoints: Arc<dyn Endpoints>,
    extractor: Arc<dyn PageExtractor>,
}

impl PageCursor {
    /// A cursor positioned at the newest page.
    pub fn new(
        owner: impl Into<String>,
        collection: CollectionType,
        gateway: FetchGateway,
        endpoints: Arc<dyn Endpoints>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        let start = CursorState::start(endpoints.first_token(collection));
        Self::resume(owner, collection, start, gateway, endpoints, extractor)
    }

    /// A cursor continuing from a saved position.
    pub fn resume(
        owner: impl Into<String>,
        collection: CollectionType,
        state: CursorState,
        gateway: FetchGateway,
        endpoints: Arc<dyn Endpoints>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        Self {
            owner: owner.into(),
            collection,
            state: Some(state),
            gateway,
            endpoints,
            extractor,
        }
    }

    /// Current position, `None` once the end of the collection was reached.
    pub fn state(&self) -> Option<&CursorState> {
        self.state.as_ref()
    }

    /// Ordinal of the page the next call to [`PageCursor::next`] fetches.
    pub fn page_number(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.page_number)
    }

    /// Fetch the next page, or `None` at the end of the collection.
    ///
    /// On error the position is left unchanged, so calling `next` again
    /// retries the same page.
    pub async fn next(&mut self) -> Result<Option<FetchedPage>, PageFetchError> {
        let Some(state) = self.state.clone() else {
            return Ok(None);
        };

        let url = self
            .endpoints
            .listing_url(&self.owner, self.collection, &state.token);
        let tag = |error| PageFetchError {
            page: state.page_number,
            error,
        };

        let body = self.gateway.get(&self.owner, &url).await.map_err(tag)?;
        let page = self
            .extractor
            .parse_listing(self.collection, &body)
            .map_err(|e| tag(e.into()))?;

        if page.items.is_empty() {
            tracing::debug!(
                owner = %self.owner,
                collection = %self.collection,
                page = state.page_number,
                "empty page, end of collection"
            );
            self.state = None;
            return Ok(None);
        }

        // A site that links a page to itself would loop forever
        let resume = page
            .next
            .filter(|next| *next != state.token)
            .map(|next| state.next_page(next));

        let items = page.items.into_iter().skip(state.position).collect();

        tracing::debug!(
            owner = %self.owner,
            collection = %self.collection,
            page = state.page_number,
            last = resume.is_none(),
            "fetched listing page"
        );

        self.state = resume.clone();
        Ok(Some(FetchedPage {
            number: state.page_number,
            items,
            state,
            resume,
        }))
    }
}
