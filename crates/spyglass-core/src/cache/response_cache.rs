//! Response cache with content fingerprints and an early stale threshold.
//!
//! Every cached response carries the SHA-256 fingerprint of its body
//! (computed once, at insert) and three timestamps:
//!
//! ```text
//! created_at ────────── stale_at ─────────── expires_at
//!     │   fresh            │  stale-but-usable    │   dead
//!     └── X-Cache: HIT ────┴── X-Cache: STALE ────┴── miss
//! ```
//!
//! The stale threshold sits at 80% of the TTL. A stale entry is still
//! served; the caller decides whether to revalidate. The cache itself never
//! refreshes anything on its own.

use crate::cache::fingerprint::fingerprint;
use crate::cache::ttl_cache::{CacheStats, TtlCache};
use crate::cache::CacheError;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fraction of the TTL after which an entry counts as stale.
const STALE_FRACTION: f64 = 0.8;

#[derive(Clone)]
struct StoredResponse {
    value: Arc<Value>,
    fingerprint: String,
    created_at: Instant,
    stale_at: Instant,
}

/// A live cache entry as seen by a reader.
#[derive(Debug, Clone)]
pub struct CachedLookup {
    pub value: Arc<Value>,
    pub fingerprint: String,
    pub is_stale: bool,
    pub age: Duration,
    /// Time left until the stale threshold; zero once stale.
    pub fresh_for: Duration,
}

/// Bounded cache for upstream response bodies.
///
/// Storage, expiry, eviction and hit/miss accounting come from the
/// underlying [`TtlCache`]; this layer adds fingerprints, the stale
/// threshold, ETag comparison and pattern invalidation.
pub struct ResponseCache {
    inner: Arc<TtlCache<String, StoredResponse>>,
}

impl ResponseCache {
    /// Creates a response cache holding at most `max_entries` responses.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if `max_entries` is zero.
    pub fn new(max_entries: usize) -> Result<Self, CacheError> {
        Ok(Self { inner: Arc::new(TtlCache::new(max_entries)?) })
    }

    /// Caches `value` under `key` for `ttl`, computing its fingerprint now.
    ///
    /// Returns the fingerprint so the caller serving this response does not
    /// have to look it up again.
    pub fn set(&self, key: &str, value: Arc<Value>, ttl: Duration) -> String {
        let fp = fingerprint(&value);
        let created_at = Instant::now();
        let stored = StoredResponse {
            value,
            fingerprint: fp.clone(),
            created_at,
            stale_at: created_at + ttl.mul_f64(STALE_FRACTION),
        };
        self.inner.set(key.to_string(), stored, ttl);
        fp
    }

    /// Looks up `key`. Dead entries are purged and miss; live entries are
    /// returned whether fresh or stale, with `is_stale` telling them apart.
    pub fn get(&self, key: &str) -> Option<CachedLookup> {
        let stored = self.inner.get(key)?;
        let now = Instant::now();
        Some(CachedLookup {
            value: stored.value,
            fingerprint: stored.fingerprint,
            is_stale: now >= stored.stale_at,
            age: now.duration_since(stored.created_at),
            fresh_for: stored.stale_at.saturating_duration_since(now),
        })
    }

    /// How long an entry inserted with `ttl` stays fresh before crossing
    /// the stale threshold.
    #[must_use]
    pub fn fresh_window(ttl: Duration) -> Duration {
        ttl.mul_f64(STALE_FRACTION)
    }

    /// Returns whether a live entry under `key` carries exactly
    /// `incoming_fingerprint`.
    ///
    /// Drives `If-None-Match` handling; does not count as a lookup in the
    /// hit/miss stats.
    #[must_use]
    pub fn etag_matches(&self, key: &str, incoming_fingerprint: &str) -> bool {
        self.inner
            .peek(key)
            .is_some_and(|stored| stored.fingerprint == incoming_fingerprint)
    }

    /// Removes every entry whose key matches `pattern` and returns the
    /// number removed.
    ///
    /// The pattern is tried as a regex first; if it does not compile it is
    /// treated as a plain substring. A literal pattern behaves the same
    /// either way.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let removed = match Regex::new(pattern) {
            Ok(re) => self.inner.remove_matching(|key| re.is_match(key)),
            Err(_) => self.inner.remove_matching(|key| key.contains(pattern)),
        };
        if removed > 0 {
            debug!(pattern, removed, "invalidated cached responses");
        }
        removed
    }

    /// Removes all cached responses. Hit/miss counters survive.
    pub fn clear(&self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Starts the periodic sweep for dead entries.
    pub fn start_cleanup(&self, interval: Duration) {
        self.inner.start_cleanup(interval);
    }

    /// Stops the periodic sweep.
    pub fn stop_cleanup(&self) {
        self.inner.stop_cleanup();
    }
}
