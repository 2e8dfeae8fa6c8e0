//! Single-flight deduplication of identical in-flight operations.
//!
//! When several callers ask for the same resource at the same time, only
//! the first (the leader) reaches upstream; everyone else joins the flight
//! and receives a clone of the same outcome, success and failure alike.
//!
//! This is not a cache. The in-flight entry is removed the moment the
//! operation settles and before any waiter is woken, so a caller arriving
//! right after settlement starts a fresh flight.
//!
//! Keys are caller-provided fingerprints; the deduplicator never inspects
//! the operation itself.

use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::trace;

/// Point-in-time deduplicator statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DedupStats {
    /// Flights currently in progress.
    pub in_flight: usize,
    /// Operations actually executed (one per flight).
    pub flights_led: u64,
    /// Callers that piggybacked on an existing flight.
    pub callers_joined: u64,
}

struct Flight<T> {
    waiters: Vec<oneshot::Sender<T>>,
}

/// Collapses concurrent operations with the same fingerprint onto a single
/// execution.
pub struct RequestDeduplicator<T> {
    inflight: DashMap<String, Flight<T>, RandomState>,
    flights_led: AtomicU64,
    callers_joined: AtomicU64,
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestDeduplicator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::with_hasher(RandomState::new()),
            flights_led: AtomicU64::new(0),
            callers_joined: AtomicU64::new(0),
        }
    }

    /// Number of flights currently in progress.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            in_flight: self.inflight.len(),
            flights_led: self.flights_led.load(Ordering::Relaxed),
            callers_joined: self.callers_joined.load(Ordering::Relaxed),
        }
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone,
{
    /// Runs `operation` under `fingerprint`, or joins the flight already
    /// running under it.
    ///
    /// Exactly one execution happens per flight; every sharer gets a clone
    /// of the leader's outcome. If a leader is dropped before settling
    /// (its caller went away), waiters restart and one of them leads a
    /// fresh flight.
    pub async fn deduplicate<F, Fut>(&self, fingerprint: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            // Join or claim leadership. The shard guard must not be held
            // across an await, so the decision is made in its own scope.
            let waiter = match self.inflight.entry(fingerprint.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let (tx, rx) = oneshot::channel();
                    occupied.get_mut().waiters.push(tx);
                    Some(rx)
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Flight { waiters: Vec::new() });
                    None
                }
            };

            let Some(rx) = waiter else { break };
            self.callers_joined.fetch_add(1, Ordering::Relaxed);
            match rx.await {
                Ok(outcome) => return outcome,
                Err(_) => {
                    trace!(fingerprint, "flight leader vanished, retrying");
                    continue;
                }
            }
        }

        self.flights_led.fetch_add(1, Ordering::Relaxed);
        let guard = FlightGuard { registry: self, fingerprint, settled: false };
        let outcome = operation().await;

        // Settlement removes the entry before any waiter is woken; a new
        // caller from here on leads its own flight.
        let waiters = guard.settle();
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }
}

/// Removes the in-flight entry on every leader exit path.
///
/// If the leader future is dropped mid-operation the entry is removed with
/// its waiter channels, which wakes every waiter with a receive error and
/// sends them back around the retry loop.
struct FlightGuard<'a, T> {
    registry: &'a RequestDeduplicator<T>,
    fingerprint: &'a str,
    settled: bool,
}

impl<T> FlightGuard<'_, T> {
    fn settle(mut self) -> Vec<oneshot::Sender<T>> {
        self.settled = true;
        self.registry
            .inflight
            .remove(self.fingerprint)
            .map(|(_, flight)| flight.waiters)
            .unwrap_or_default()
    }
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.inflight.remove(self.fingerprint);
        }
    }
}
