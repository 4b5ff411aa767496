//! Request throttling shared by every job of a run.
//!
//! Two layers: a per-owner soft limiter that spreads one owner's requests
//! out, and a global token bucket that bounds the request rate towards the
//! site. Waiters for the global bucket queue on a fair mutex, so they are
//! served in arrival order.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type KeyedLimiter = governor::RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limit settings. An interval of zero disables that layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum spacing between requests across all jobs.
    pub global_interval_ms: u64,
    /// Requests the global bucket lets through back to back.
    pub burst: u32,
    /// Minimum spacing between requests for the same owner.
    pub per_owner_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_interval_ms: 1000,
            burst: 1,
            per_owner_interval_ms: 2000,
        }
    }
}

impl RateLimitConfig {
    /// No throttling at all.
    pub fn unlimited() -> Self {
        Self {
            global_interval_ms: 0,
            burst: 1,
            per_owner_interval_ms: 0,
        }
    }
}

fn quota(interval_ms: u64, burst: u32) -> Option<Quota> {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(Duration::from_millis(interval_ms)).map(|q| q.allow_burst(burst))
}

/// The process-wide request limiter.
///
/// Shared by handle (`Arc<RateLimiter>`) between all workers.
pub struct RateLimiter {
    global: Option<DirectLimiter>,
    per_owner: Option<KeyedLimiter>,
    queue: Mutex<()>,
    granted: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter from its configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: quota(config.global_interval_ms, config.burst).map(DirectLimiter::direct),
            per_owner: quota(config.per_owner_interval_ms, 1).map(KeyedLimiter::keyed),
            queue: Mutex::new(()),
            granted: AtomicU64::new(0),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(&RateLimitConfig::unlimited())
    }

    /// Wait until a request for `owner` may be sent.
    ///
    /// Cancel-safe: dropping the future gives up the place in the queue
    /// without consuming a token.
    pub async fn acquire(&self, owner: &str) {
        if let Some(per_owner) = &self.per_owner {
            per_owner.until_key_ready(&owner.to_string()).await;
        }

        if let Some(global) = &self.global {
            let _turn = self.queue.lock().await;
            global.until_ready().await;
        }

        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of requests let through so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("global", &self.global.is_some())
            .field("per_owner", &self.per_owner.is_some())
            .field("granted", &self.granted())
            .finish()
    }
}
