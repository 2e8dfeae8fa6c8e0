//! Bounded TTL cache with insertion-order eviction.
//!
//! Entries expire individually (`expires_at` per entry) and the cache as a
//! whole is capped at `max_size` entries. When an insert would exceed the
//! cap, the oldest entry **by insertion order** is evicted. Reads do not
//! refresh insertion order and overwrites keep the key's original position,
//! so this is deliberately weaker than LRU: a hot entry inserted early is
//! still the first to go. Callers that need recency-aware eviction layer it
//! themselves.
//!
//! Expired entries are purged lazily on access and eagerly by the optional
//! background sweep ([`TtlCache::start_cleanup`]).

use crate::cache::CacheError;
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before the first lookup.
    pub hit_rate: f64,
}

struct CacheSlot<V> {
    value: V,
    expires_at: Instant,
    /// Monotonic insertion stamp tying this slot to its order-queue entry.
    stamp: u64,
}

struct OrderEntry<K> {
    key: K,
    stamp: u64,
}

struct TtlCacheInner<K, V> {
    entries: HashMap<K, CacheSlot<V>, ahash::RandomState>,
    /// Insertion order, oldest at the front. Entries whose stamp no longer
    /// matches the live slot are ghosts (deleted or expired keys) and are
    /// skipped during eviction.
    order: VecDeque<OrderEntry<K>>,
    next_stamp: u64,
}

/// Bounded in-memory cache with per-entry TTL.
///
/// All operations are synchronous; the single mutex covers both the entry
/// map and the order queue so an eviction decision always sees a consistent
/// pair. Hit and miss counters live outside the lock.
pub struct TtlCache<K, V> {
    inner: Mutex<TtlCacheInner<K, V>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `max_size` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if `max_size` is zero.
    pub fn new(max_size: usize) -> Result<Self, CacheError> {
        if max_size == 0 {
            return Err(CacheError::InvalidConfig("max_size must be non-zero".to_string()));
        }

        Ok(Self {
            inner: Mutex::new(TtlCacheInner {
                entries: HashMap::with_hasher(ahash::RandomState::new()),
                order: VecDeque::new(),
                next_stamp: 0,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cleanup_task: Mutex::new(None),
        })
    }

    /// Inserts `value` under `key`, expiring after `ttl`.
    ///
    /// Overwriting an existing key updates value and expiry in place and
    /// keeps the key's original insertion position. Inserting a new key at
    /// capacity first evicts the oldest-inserted live entry.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.entries.get_mut(&key) {
            slot.value = value;
            slot.expires_at = expires_at;
            return;
        }

        if inner.entries.len() >= self.max_size {
            Self::evict_oldest(&mut inner);
        }

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.order.push_back(OrderEntry { key: key.clone(), stamp });
        inner.entries.insert(key, CacheSlot { value, expires_at, stamp });
    }

    /// Looks up `key`, counting a hit or a miss.
    ///
    /// An expired entry is removed and counts as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let result = self.lookup(key);
        match &result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Looks up `key` without touching the hit/miss counters.
    ///
    /// Used by revalidation checks that should not distort the stats the
    /// admin surface reports.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(key)
    }

    fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(slot) if Instant::now() < slot.expires_at => Some(slot.value.clone()),
            Some(_) => {
                // Dead entry observed: purge it now. Its order entry
                // becomes a ghost and is skipped later.
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Removes `key` if present. Does not touch the counters.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Removes every entry whose key satisfies `predicate`; returns the
    /// number removed.
    pub fn remove_matching(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !predicate(key));
        before - inner.entries.len()
    }

    /// Removes all entries. The hit/miss counters are left intact.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time stats snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        CacheStats { size, hits, misses, hit_rate }
    }

    /// Removes every expired entry and compacts the order queue; returns
    /// the number of entries removed. Does not touch the counters.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| now < slot.expires_at);
        let removed = before - inner.entries.len();

        // Drop ghosts so the order queue stays proportional to the map.
        let TtlCacheInner { entries, order, .. } = &mut *inner;
        order.retain(|e| entries.get(&e.key).is_some_and(|slot| slot.stamp == e.stamp));

        removed
    }

    /// Evicts the oldest-inserted live entry. Ghost order entries (stamp
    /// mismatch after delete/expiry/overwrite races) are discarded along
    /// the way.
    fn evict_oldest(inner: &mut TtlCacheInner<K, V>) {
        while let Some(candidate) = inner.order.pop_front() {
            let live = inner
                .entries
                .get(&candidate.key)
                .is_some_and(|slot| slot.stamp == candidate.stamp);
            if live {
                inner.entries.remove(&candidate.key);
                trace!("evicted oldest entry to stay within capacity");
                return;
            }
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts the background sweep, replacing any sweep already running.
    ///
    /// The sweep deletes expired entries every `interval` without touching
    /// the hit/miss counters. Stop it with [`TtlCache::stop_cleanup`]; the
    /// runtime does so on shutdown.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "cache sweep removed expired entries");
                }
            }
        });

        if let Some(previous) = self.cleanup_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the background sweep if one is running.
    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
            debug!("cache sweep stopped");
        }
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
    }
}
