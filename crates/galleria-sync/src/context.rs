//! Shared collaborators of a sync run.
//!
//! A [`SyncContext`] bundles the store, blob store, fetch gateway, URL
//! layout, extractor and comparator, so planners and synchronizers take a
//! single handle instead of six.
//!
//! # Example
//!
//! ```ignore
//! let ctx = SyncContext::builder()
//!     .store(store)
//!     .blobs(blobs)
//!     .fetcher(fetcher)
//!     .endpoints(DefaultEndpoints::new("https://site.test"))
//!     .build()?;
//! ```

use std::sync::Arc;

use galleria_store::{BlobStore, Store};

use crate::config::SyncConfig;
use crate::endpoints::Endpoints;
use crate::extractor::{JsonExtractor, PageExtractor};
use crate::fetch::{Credentials, FetchGateway, Fetcher};
use crate::rate_limit::RateLimiter;
use crate::reconcile::{MarkerComparator, SurrogateComparator};

/// Error type for context construction.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Missing required field in builder.
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Everything a pass needs besides the owner and collection.
pub struct SyncContext {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub gateway: FetchGateway,
    pub endpoints: Arc<dyn Endpoints>,
    pub extractor: Arc<dyn PageExtractor>,
    pub comparator: Arc<dyn SurrogateComparator>,
    pub config: SyncConfig,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::default()
    }
}

/// Builder for creating a [`SyncContext`].
#[derive(Default)]
pub struct SyncContextBuilder {
    store: Option<Arc<dyn Store>>,
    blobs: Option<Arc<dyn BlobStore>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    limiter: Option<Arc<RateLimiter>>,
    credentials: Credentials,
    endpoints: Option<Arc<dyn Endpoints>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    comparator: Option<Arc<dyn SurrogateComparator>>,
    config: SyncConfig,
}

impl SyncContextBuilder {
    /// Set the item store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the blob store for files and thumbnails.
    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Set the fetcher.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share an existing limiter. Defaults to an unlimited one.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the session credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the URL layout.
    pub fn endpoints(mut self, endpoints: impl Endpoints + 'static) -> Self {
        self.endpoints = Some(Arc::new(endpoints));
        self
    }

    /// Set the page extractor. Defaults to [`JsonExtractor`].
    pub fn extractor(mut self, extractor: impl PageExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Set the surrogate comparator. Defaults to [`MarkerComparator`].
    pub fn comparator(mut self, comparator: impl SurrogateComparator + 'static) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Set pass configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingField`] if the store, blob store,
    /// fetcher or endpoints are missing.
    pub fn build(self) -> Result<SyncContext, ContextError> {
        let store = self.store.ok_or(ContextError::MissingField { field: "store" })?;
        let blobs = self.blobs.ok_or(ContextError::MissingField { field: "blobs" })?;
        let fetcher = self
            .fetcher
            .ok_or(ContextError::MissingField { field: "fetcher" })?;
        let endpoints = self
            .endpoints
            .ok_or(ContextError::MissingField { field: "endpoints" })?;
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::unlimited()));

        let gateway = FetchGateway::new(
            fetcher,
            limiter,
            self.credentials,
            self.config.request_timeout(),
        );

        Ok(SyncContext {
            store,
            blobs,
            gateway,
            endpoints,
            extractor: self.extractor.unwrap_or_else(|| Arc::new(JsonExtractor)),
            comparator: self.comparator.unwrap_or_else(|| Arc::new(MarkerComparator)),
            config: self.config,
        })
    }
}
