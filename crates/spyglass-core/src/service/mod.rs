//! Resource fetch pipeline tying the components together.
//!
//! ```text
//!                       ┌───────────────┐
//!   fetch_resource ────▶│ ResponseCache │── fresh ──▶ HIT
//!                       └───────┬───────┘
//!                       stale │ │ miss
//!          ┌──────────────────┘ │
//!          ▼                    ▼
//!   spawn revalidation   ┌──────────────┐   one flight per endpoint
//!   (serve STALE now)    │ Deduplicator │──────────┐
//!                        └──────────────┘          ▼
//!                                          ┌───────────────┐
//!                                          │ OperationPool │ bounded,
//!                                          └───────┬───────┘ timed out
//!                                                  ▼
//!                                          RetryPolicy ▶ NodeClient
//! ```
//!
//! Only the single-flight leader talks to the origin and writes the
//! cache; every concurrent caller for the same endpoint shares that one
//! outcome. A stale hit is served immediately while a refresh runs in
//! the background, so request latency never depends on revalidation.

use crate::cache::{CacheStats, ResponseCache};
use crate::dedup::{DedupStats, RequestDeduplicator};
use crate::pool::{OperationPool, PoolError, PoolStats};
use crate::realtime::{ChannelRegistry, RegistryStats};
use crate::retry::RetryPolicy;
use crate::types::{CacheStatus, FetchedResource, Topic};
use crate::upstream::{NodeClient, UpstreamError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by the fetch pipeline.
///
/// `Clone` because a deduplicated failure is handed to every caller that
/// joined the flight.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// Origin fetch failed after retries.
    #[error("Origin fetch failed: {0}")]
    Upstream(Arc<UpstreamError>),

    /// The pooled operation ran past its deadline. The work itself was
    /// abandoned, not interrupted.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The pooled operation was cancelled before settling.
    #[error("Operation cancelled")]
    Cancelled,

    /// A pipeline fault that is not the origin's doing.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PoolError> for ServiceError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::TimedOut(elapsed) => Self::Timeout(elapsed),
            PoolError::Cancelled => Self::Cancelled,
            PoolError::Panicked(message) | PoolError::InvalidConfig(message) => {
                Self::Internal(message)
            }
        }
    }
}

/// What a completed origin flight hands to everyone who joined it.
#[derive(Debug, Clone)]
pub struct OriginFetch {
    pub value: Arc<Value>,
    pub fingerprint: String,
}

/// Stats snapshot across every pipeline component.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub dedup: DedupStats,
    pub pool: PoolStats,
    pub realtime: RegistryStats,
}

/// The pool as instantiated for origin fetches.
pub type FetchPool = OperationPool<Result<Value, UpstreamError>>;
/// The deduplicator as instantiated for origin fetches.
pub type OriginDeduplicator = RequestDeduplicator<Result<OriginFetch, ServiceError>>;

/// The resource fetch pipeline.
///
/// Cheap to clone; every field is shared. The composition root builds
/// the components and hands them in, nothing in here is global.
#[derive(Clone)]
pub struct ResourceService {
    cache: Arc<ResponseCache>,
    dedup: Arc<OriginDeduplicator>,
    pool: Arc<FetchPool>,
    node: Arc<NodeClient>,
    registry: Arc<ChannelRegistry>,
    retry: RetryPolicy,
    cache_ttl: Duration,
}

impl ResourceService {
    #[must_use]
    pub fn new(
        cache: Arc<ResponseCache>,
        dedup: Arc<OriginDeduplicator>,
        pool: Arc<FetchPool>,
        node: Arc<NodeClient>,
        registry: Arc<ChannelRegistry>,
        retry: RetryPolicy,
        cache_ttl: Duration,
    ) -> Self {
        Self { cache, dedup, pool, node, registry, retry, cache_ttl }
    }

    /// Serves `endpoint` from cache when possible, from the origin
    /// otherwise.
    ///
    /// A stale hit is returned immediately with a refresh started in the
    /// background; the caller never waits on revalidation.
    ///
    /// # Errors
    ///
    /// Only the miss path can fail; see [`ServiceError`].
    pub async fn fetch_resource(&self, endpoint: &str) -> Result<FetchedResource, ServiceError> {
        if let Some(found) = self.cache.get(endpoint) {
            if found.is_stale {
                debug!(
                    endpoint,
                    age_ms = found.age.as_millis() as u64,
                    "serving stale entry, revalidating in background"
                );
                self.spawn_revalidation(endpoint);
                return Ok(FetchedResource {
                    value: found.value,
                    fingerprint: found.fingerprint,
                    status: CacheStatus::Stale,
                    fresh_for: Duration::ZERO,
                });
            }
            return Ok(FetchedResource {
                value: found.value,
                fingerprint: found.fingerprint,
                status: CacheStatus::Hit,
                fresh_for: found.fresh_for,
            });
        }

        let fetched = self.fetch_origin(endpoint).await?;
        Ok(FetchedResource {
            value: fetched.value,
            fingerprint: fetched.fingerprint,
            status: CacheStatus::Miss,
            fresh_for: ResponseCache::fresh_window(self.cache_ttl),
        })
    }

    /// Fetches `endpoint` from the origin through dedup, pool and retry,
    /// caching the response on success.
    ///
    /// Concurrent calls for the same endpoint collapse into one flight.
    pub async fn fetch_origin(&self, endpoint: &str) -> Result<OriginFetch, ServiceError> {
        let service = self.clone();
        let key = endpoint.to_string();
        self.dedup.deduplicate(endpoint, move || service.lead_origin_flight(key)).await
    }

    /// The single-flight leader body: pooled, retried, cached on success.
    async fn lead_origin_flight(self, endpoint: String) -> Result<OriginFetch, ServiceError> {
        let node = Arc::clone(&self.node);
        let retry = self.retry.clone();
        let path = endpoint.clone();
        let operation = async move {
            retry.retry_with(|| node.fetch(&path), UpstreamError::is_transient).await
        };

        let outcome = self.pool.submit(endpoint.clone(), operation).outcome().await;
        let value = match outcome {
            Ok(Ok(value)) => Arc::new(value),
            Ok(Err(error)) => {
                warn!(endpoint = %endpoint, error = %error, "origin fetch failed");
                return Err(ServiceError::Upstream(Arc::new(error)));
            }
            Err(error) => return Err(error.into()),
        };

        let fingerprint = self.cache.set(&endpoint, Arc::clone(&value), self.cache_ttl);
        Ok(OriginFetch { value, fingerprint })
    }

    /// Refreshes a stale entry off the request path. A failed refresh is
    /// logged and the stale entry stays put.
    fn spawn_revalidation(&self, endpoint: &str) {
        let service = self.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            if let Err(error) = service.fetch_origin(&endpoint).await {
                warn!(endpoint = %endpoint, error = %error, "background revalidation failed");
            }
        });
    }

    /// Whether the live entry for `endpoint` still carries
    /// `fingerprint`. Drives `If-None-Match` handling.
    #[must_use]
    pub fn etag_matches(&self, endpoint: &str, fingerprint: &str) -> bool {
        self.cache.etag_matches(endpoint, fingerprint)
    }

    /// Pushes a new block to `blocks` subscribers. Returns delivery count.
    pub fn broadcast_new_block(&self, block: &Value) -> usize {
        self.broadcast_event("new_block", Topic::Blocks, block)
    }

    /// Pushes a new transaction to `transactions` subscribers.
    pub fn broadcast_new_transaction(&self, transaction: &Value) -> usize {
        self.broadcast_event("new_transaction", Topic::Transactions, transaction)
    }

    /// Pushes a validator set change to `validators` subscribers.
    pub fn broadcast_validator_update(&self, update: &Value) -> usize {
        self.broadcast_event("validator_update", Topic::Validators, update)
    }

    fn broadcast_event(&self, kind: &str, topic: Topic, data: &Value) -> usize {
        let envelope = json!({ "type": kind, "topic": topic.as_str(), "data": data });
        let delivered = self.registry.broadcast(&envelope, Some(topic.as_str()));
        debug!(kind, topic = %topic, delivered, "event broadcast");
        delivered
    }

    /// Drops cached entries whose key matches `pattern`; returns how many.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Drops every cached entry. Hit/miss counters survive.
    pub fn clear_all(&self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.stats(),
            dedup: self.dedup.stats(),
            pool: self.pool.stats(),
            realtime: self.registry.stats(),
        }
    }

    /// Registry handle for the realtime transport layer.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Direct cache handle, for tests.
    #[doc(hidden)]
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}
