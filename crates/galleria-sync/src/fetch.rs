//! Fetch abstraction and the gateway every request goes through.
//!
//! The [`Fetcher`] knows how to GET a URL; it has no notion of pacing,
//! timeouts or cancellation. [`FetchGateway`] adds those: each request
//! waits for the shared [`RateLimiter`], runs under a per-request timeout,
//! and is abandoned as soon as the job's cancellation token fires.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError, TransportError};
use crate::rate_limit::RateLimiter;

/// Session credentials handed to the fetcher on every request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Cookie name to value.
    pub cookies: BTreeMap<String, String>,
}

impl Credentials {
    /// Credentials made of the given cookies.
    pub fn from_cookies<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cookies: cookies
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Render as a `Cookie` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cookie values are secrets
        f.debug_struct("Credentials")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Transport trait for fetching remote pages and assets.
///
/// Implementations must be thread-safe (Send + Sync). A fetch is a plain
/// GET and is safe to repeat.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the body at `url`.
    async fn fetch(&self, url: &str, credentials: &Credentials)
        -> std::result::Result<Bytes, TransportError>;
}

/// Rate-limited, timed, cancellable access to a [`Fetcher`].
///
/// Cheap to clone. A job works on a clone bound to its own cancellation
/// token (see [`FetchGateway::with_cancellation`]).
#[derive(Clone)]
pub struct FetchGateway {
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<RateLimiter>,
    credentials: Arc<Credentials>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl FetchGateway {
    /// Create a gateway.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<RateLimiter>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            credentials: Arc::new(credentials),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// The same gateway, cancelled by `cancel`.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// The token this gateway observes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// GET `url` on behalf of `owner`.
    ///
    /// Transport failures are classified for the owner: 401/403 halt it,
    /// 404 is permanent, timeouts and 5xx stay transient.
    pub async fn get(&self, owner: &str, url: &str) -> Result<Bytes> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = self.limiter.acquire(owner) => {}
        }

        let request = tokio::time::timeout(self.timeout, self.fetcher.fetch(url, &self.credentials));

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            response = request => response,
        };

        match response {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                tracing::debug!(%owner, %url, error = %e, "fetch failed");
                Err(SyncError::from_transport(owner, url, e))
            }
            Err(_) => {
                tracing::debug!(%owner, %url, timeout = ?self.timeout, "fetch timed out");
                Err(SyncError::Transport(TransportError::Timeout(self.timeout)))
            }
        }
    }
}

impl fmt::Debug for FetchGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchGateway")
            .field("limiter", &self.limiter)
            .field("credentials", &self.credentials)
            .field("timeout", &self.timeout)
            .finish()
    }
}
