//! Per-client message rate limiting over a fixed one-second window.
//!
//! The limiter only reports; it never disconnects anyone. The WebSocket
//! boundary decides what to do with repeat offenders (see
//! `RealtimeConfig::violation_limit`).

use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Window over which messages are counted.
const WINDOW: Duration = Duration::from_secs(1);

/// Per-client counters for the current window.
#[derive(Debug, Clone)]
struct ClientRateState {
    message_count: u32,
    window_start: Instant,
    violations: u32,
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Accepted,
    /// The message must be dropped. `violations` counts this client's
    /// rejections in the current window, including this one.
    Rejected { violations: u32 },
}

/// Sliding-window limiter keyed by client id.
pub struct RateLimiter {
    clients: DashMap<Uuid, ClientRateState, RandomState>,
    max_per_window: u32,
    /// Cumulative across all clients and windows; window resets do not
    /// wind this back.
    violations_total: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_per_window: u32) -> Self {
        Self {
            clients: DashMap::with_hasher(RandomState::new()),
            max_per_window,
            violations_total: AtomicU64::new(0),
        }
    }

    /// Counts one inbound message for `client` and decides its fate.
    ///
    /// A window that has aged out is reset first, zeroing both the message
    /// count and the violation count. The message is then counted, and
    /// anything beyond `max_per_window` is rejected: exactly one rejection
    /// for `max + 1` messages inside one window.
    pub fn check(&self, client: Uuid) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: Uuid, now: Instant) -> RateDecision {
        let mut state = self.clients.entry(client).or_insert_with(|| ClientRateState {
            message_count: 0,
            window_start: now,
            violations: 0,
        });

        if now.duration_since(state.window_start) >= WINDOW {
            state.window_start = now;
            state.message_count = 0;
            state.violations = 0;
        }

        state.message_count += 1;
        if state.message_count > self.max_per_window {
            state.violations += 1;
            self.violations_total.fetch_add(1, Ordering::Relaxed);
            RateDecision::Rejected { violations: state.violations }
        } else {
            RateDecision::Accepted
        }
    }

    /// Forgets a disconnected client.
    pub fn remove(&self, client: Uuid) {
        self.clients.remove(&client);
    }

    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Cumulative violations across all clients since startup.
    #[must_use]
    pub fn violations_total(&self) -> u64 {
        self.violations_total.load(Ordering::Relaxed)
    }
}
