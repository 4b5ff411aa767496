//! A scripted in-memory remote site.
//!
//! [`FakeSite`] implements [`Fetcher`] over the URL layout of
//! [`DefaultEndpoints`] and serves the JSON rendition that
//! [`JsonExtractor`](galleria_sync::JsonExtractor) reads. Tests post, edit
//! and delete items, script failures for specific URLs and inspect the
//! request log afterwards.
//!
//! ```rust
//! use galleria_core::CollectionType;
//! use galleria_testkit::FakeSite;
//!
//! let site = FakeSite::new(2);
//! site.post("alice", CollectionType::Gallery, "1001", "First");
//! site.post("alice", CollectionType::Gallery, "1002", "Second");
//! assert_eq!(site.listing_ids("alice", CollectionType::Gallery), vec!["1002", "1001"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use galleria_core::{CollectionType, DetailRecord, ItemId, ItemSummary, ListingPage, PageToken};
use galleria_sync::{Credentials, DefaultEndpoints, Endpoints, Fetcher, TransportError};

/// Base URL the fake site answers on.
pub const SITE_URL: &str = "https://gallery.test";

/// A scripted failure of one URL.
#[derive(Debug, Clone)]
struct Failure {
    error: TransportError,
    remaining: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    id: ItemId,
    /// Submission a favorite link points at.
    target: Option<ItemId>,
}

#[derive(Default)]
struct SiteState {
    /// Listing entries per (owner, collection), newest first.
    listings: HashMap<(String, CollectionType), Vec<Entry>>,
    details: HashMap<ItemId, DetailRecord>,
    /// Visible edit counter per detail id; drives listing surrogates.
    revisions: HashMap<ItemId, u32>,
    assets: HashMap<String, Bytes>,
    failures: HashMap<String, Failure>,
    disabled: HashSet<String>,
    cancel_hooks: HashMap<String, CancellationToken>,
    requests: Vec<String>,
    surrogates: bool,
}

/// An in-memory gallery site.
pub struct FakeSite {
    page_size: usize,
    endpoints: DefaultEndpoints,
    state: Mutex<SiteState>,
}

impl FakeSite {
    /// A site whose listing pages hold `page_size` entries.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            endpoints: DefaultEndpoints::new(SITE_URL),
            state: Mutex::new(SiteState {
                surrogates: true,
                ..SiteState::default()
            }),
        }
    }

    /// The URL layout this site answers on.
    pub fn endpoints(&self) -> DefaultEndpoints {
        self.endpoints.clone()
    }

    /// Stop publishing listing surrogates, forcing callers to rely on
    /// their unknown-surrogate policy.
    pub fn without_surrogates(self) -> Self {
        self.state.lock().unwrap().surrogates = false;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Post a new item at the top of an owner's collection.
    ///
    /// Non-journal items get a main file and a thumbnail.
    pub fn post(&self, owner: &str, collection: CollectionType, id: &str, title: &str) {
        let id = ItemId::from(id);
        let mut detail = DetailRecord {
            id: id.clone(),
            author: owner.to_string(),
            title: title.to_string(),
            description: format!("{} by {}", title, owner),
            tags: vec![collection.to_string()],
            file_url: None,
            thumbnail_url: None,
            posted_at: None,
        };

        let mut state = self.state.lock().unwrap();
        if collection.has_files() {
            let file = format!("{}/files/{}.png", SITE_URL, id);
            let thumb = format!("{}/thumbs/{}.jpg", SITE_URL, id);
            state
                .assets
                .insert(file.clone(), Bytes::from(format!("file {}", id)));
            state
                .assets
                .insert(thumb.clone(), Bytes::from(format!("thumbnail {}", id)));
            detail.file_url = Some(file);
            detail.thumbnail_url = Some(thumb);
        }
        state.details.insert(id.clone(), detail);
        state.revisions.insert(id.clone(), 0);
        state
            .listings
            .entry((owner.to_string(), collection))
            .or_default()
            .insert(0, Entry { id, target: None });
    }

    /// Post several items in order, so the last one ends up newest.
    pub fn post_many<I, S>(&self, owner: &str, collection: CollectionType, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            let id = id.as_ref();
            self.post(owner, collection, id, &format!("Item {}", id));
        }
    }

    /// Add a favorite link of `owner` pointing at an existing submission.
    pub fn favorite(&self, owner: &str, link_id: &str, target_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .listings
            .entry((owner.to_string(), CollectionType::Favorites))
            .or_default()
            .insert(
                0,
                Entry {
                    id: ItemId::from(link_id),
                    target: Some(ItemId::from(target_id)),
                },
            );
    }

    /// Edit an item's detail. The listing surrogate changes with it.
    pub fn edit(&self, id: &str, edit: impl FnOnce(&mut DetailRecord)) {
        let id = ItemId::from(id);
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = state.details.get_mut(&id) {
            edit(detail);
        }
        *state.revisions.entry(id).or_default() += 1;
    }

    /// Edit an item's detail without changing its listing surrogate.
    pub fn edit_silently(&self, id: &str, edit: impl FnOnce(&mut DetailRecord)) {
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = state.details.get_mut(&ItemId::from(id)) {
            edit(detail);
        }
    }

    /// Bump an item's listing surrogate without changing its content.
    pub fn touch(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        *state.revisions.entry(ItemId::from(id)).or_default() += 1;
    }

    /// Take an entry off an owner's listing. Its detail page stays up.
    pub fn delete(&self, owner: &str, collection: CollectionType, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.listings.get_mut(&(owner.to_string(), collection)) {
            entries.retain(|e| e.id.as_str() != id);
        }
    }

    /// Replace the bytes served for an asset URL.
    pub fn set_asset(&self, url: &str, data: impl Into<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .assets
            .insert(url.to_string(), data.into());
    }

    /// Entry ids of a listing, newest first.
    pub fn listing_ids(&self, owner: &str, collection: CollectionType) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .listings
            .get(&(owner.to_string(), collection))
            .map(|entries| entries.iter().map(|e| e.id.to_string()).collect())
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure Scripting
    // ─────────────────────────────────────────────────────────────────────────

    /// Fail the next `times` requests to `url`.
    pub fn fail_url(&self, url: &str, error: TransportError, times: usize) {
        self.state.lock().unwrap().failures.insert(
            url.to_string(),
            Failure {
                error,
                remaining: times,
            },
        );
    }

    /// Fail the next `times` detail fetches of an item.
    pub fn fail_detail(&self, collection: CollectionType, id: &str, error: TransportError, times: usize) {
        let url = self.endpoints.detail_url(collection, &ItemId::from(id));
        self.fail_url(&url, error, times);
    }

    /// Fail the next `times` fetches of a numbered listing page.
    pub fn fail_page(
        &self,
        owner: &str,
        collection: CollectionType,
        page: u32,
        error: TransportError,
        times: usize,
    ) {
        let url = self
            .endpoints
            .listing_url(owner, collection, &PageToken::Number(page));
        self.fail_url(&url, error, times);
    }

    /// Answer every listing request of `owner` as a disabled account.
    pub fn disable_account(&self, owner: &str) {
        self.state.lock().unwrap().disabled.insert(owner.to_string());
    }

    /// Cancel `token` when `url` is requested. The request itself succeeds.
    pub fn cancel_on(&self, url: &str, token: CancellationToken) {
        self.state
            .lock()
            .unwrap()
            .cancel_hooks
            .insert(url.to_string(), token);
    }

    /// URL of a numbered listing page.
    pub fn page_url(&self, owner: &str, collection: CollectionType, page: u32) -> String {
        self.endpoints
            .listing_url(owner, collection, &PageToken::Number(page))
    }

    /// URL of an item's detail page.
    pub fn detail_url(&self, collection: CollectionType, id: &str) -> String {
        self.endpoints.detail_url(collection, &ItemId::from(id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Log
    // ─────────────────────────────────────────────────────────────────────────

    /// Every requested URL, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of detail page requests.
    pub fn detail_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.contains("/view/") || url.contains("/journal/"))
            .count()
    }

    /// Number of requests for one URL.
    pub fn requests_for(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rendering
    // ─────────────────────────────────────────────────────────────────────────

    fn respond(&self, url: &str) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());

        if let Some(token) = state.cancel_hooks.remove(url) {
            token.cancel();
        }
        if let Some(failure) = state.failures.get_mut(url) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(failure.error.clone());
            }
        }
        if let Some(asset) = state.assets.get(url) {
            return Ok(asset.clone());
        }

        let path = url
            .strip_prefix(SITE_URL)
            .ok_or_else(|| TransportError::Connection(format!("unknown host: {}", url)))?;
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();

        let body = match parts.as_slice() {
            ["view" | "journal", id] => {
                let detail = state
                    .details
                    .get(&ItemId::from(*id))
                    .ok_or(TransportError::Status(404))?;
                serde_json::to_vec(detail)
            }
            [collection, owner, rest @ ..] => {
                let collection: CollectionType =
                    collection.parse().map_err(|_| TransportError::Status(404))?;
                if state.disabled.contains(*owner) {
                    return Err(TransportError::AccountDisabled(format!(
                        "{} has been disabled",
                        owner
                    )));
                }
                let page = render_listing(&state, self.page_size, owner, collection, rest)?;
                serde_json::to_vec(&page)
            }
            _ => return Err(TransportError::Status(404)),
        };

        body.map(Bytes::from)
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// One listing page. Numbered collections use `/{n}/`; favorites use
/// `/{last id}/next` tokens so pages stay put when new links are added.
fn render_listing(
    state: &SiteState,
    page_size: usize,
    owner: &str,
    collection: CollectionType,
    rest: &[&str],
) -> Result<ListingPage, TransportError> {
    let empty = Vec::new();
    let entries = state
        .listings
        .get(&(owner.to_string(), collection))
        .unwrap_or(&empty);

    let start = match (collection, rest) {
        (CollectionType::Favorites, []) => 0,
        (CollectionType::Favorites, [after, "next"]) => entries
            .iter()
            .position(|e| e.id.as_str() == *after)
            .map(|i| i + 1)
            .unwrap_or(entries.len()),
        (_, [n]) => {
            let n: usize = n.parse().map_err(|_| TransportError::Status(404))?;
            n.saturating_sub(1) * page_size
        }
        _ => return Err(TransportError::Status(404)),
    };

    let end = (start + page_size).min(entries.len());
    let window = entries.get(start..end).unwrap_or(&[]);

    let items = window
        .iter()
        .map(|entry| {
            let detail_id = entry.target.as_ref().unwrap_or(&entry.id);
            let mut summary = ItemSummary::new(entry.id.clone());
            if state.surrogates {
                let revision = state.revisions.get(detail_id).copied().unwrap_or(0);
                summary = summary.with_surrogate(format!("r{}", revision));
            }
            if let Some(target) = &entry.target {
                summary = summary.with_target(target.clone());
            }
            summary.title = state.details.get(detail_id).map(|d| d.title.clone());
            summary
        })
        .collect();

    let next = if end < entries.len() {
        match (collection, rest) {
            (CollectionType::Favorites, _) => window
                .last()
                .map(|e| PageToken::Opaque(format!("{}/next", e.id))),
            (_, [n]) => n.parse::<u32>().ok().map(|n| PageToken::Number(n + 1)),
            _ => None,
        }
    } else {
        None
    };

    Ok(ListingPage { items, next })
}

#[async_trait]
impl Fetcher for FakeSite {
    async fn fetch(&self, url: &str, _credentials: &Credentials) -> Result<Bytes, TransportError> {
        self.respond(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_sync::{JsonExtractor, PageExtractor};

    fn listing(site: &FakeSite, url: &str, collection: CollectionType) -> ListingPage {
        let body = site.respond(url).unwrap();
        JsonExtractor.parse_listing(collection, &body).unwrap()
    }

    #[test]
    fn test_numbered_pages() {
        let site = FakeSite::new(2);
        site.post_many("alice", CollectionType::Gallery, ["1", "2", "3"]);

        let first = listing(&site, &site.page_url("alice", CollectionType::Gallery, 1), CollectionType::Gallery);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].id.as_str(), "3");
        assert_eq!(first.next, Some(PageToken::Number(2)));

        let second = listing(&site, &site.page_url("alice", CollectionType::Gallery, 2), CollectionType::Gallery);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next, None);
    }

    #[test]
    fn test_favorites_chain_by_token() {
        let site = FakeSite::new(1);
        site.post_many("bob", CollectionType::Gallery, ["10", "11"]);
        site.favorite("alice", "f1", "10");
        site.favorite("alice", "f2", "11");

        let url = site
            .endpoints()
            .listing_url("alice", CollectionType::Favorites, &PageToken::Opaque("/".into()));
        let first = listing(&site, &url, CollectionType::Favorites);
        assert_eq!(first.items[0].id.as_str(), "f2");
        assert_eq!(first.items[0].target_id, Some(ItemId::from("11")));
        assert_eq!(first.next, Some(PageToken::Opaque("f2/next".into())));
    }

    #[test]
    fn test_edit_moves_surrogate() {
        let site = FakeSite::new(5);
        site.post("alice", CollectionType::Gallery, "1", "Before");
        let url = site.page_url("alice", CollectionType::Gallery, 1);

        let before = listing(&site, &url, CollectionType::Gallery).items[0].surrogate.clone();
        site.edit("1", |d| d.title = "After".into());
        let after = listing(&site, &url, CollectionType::Gallery).items[0].surrogate.clone();
        assert_ne!(before, after);

        site.edit_silently("1", |d| d.description = "quiet".into());
        let silent = listing(&site, &url, CollectionType::Gallery).items[0].surrogate.clone();
        assert_eq!(after, silent);
    }

    #[test]
    fn test_scripted_failures() {
        let site = FakeSite::new(5);
        site.post("alice", CollectionType::Gallery, "1", "One");
        site.fail_detail(CollectionType::Gallery, "1", TransportError::Status(503), 1);
        let url = site.detail_url(CollectionType::Gallery, "1");

        assert_eq!(site.respond(&url), Err(TransportError::Status(503)));
        assert!(site.respond(&url).is_ok());
        assert_eq!(site.requests_for(&url), 2);

        site.disable_account("alice");
        assert!(matches!(
            site.respond(&site.page_url("alice", CollectionType::Gallery, 1)),
            Err(TransportError::AccountDisabled(_))
        ));
    }
}
