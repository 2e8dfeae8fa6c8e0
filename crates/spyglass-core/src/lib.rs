//! # Spyglass Core
//!
//! Caching, deduplication and resilience layer for the spyglass
//! blockchain-explorer backend.
//!
//! Browsers hammer a small set of read endpoints (blocks, transactions,
//! validators) while the chain node behind them is slow and rate limited.
//! This crate keeps the node alive by stacking the following between the
//! HTTP surface and the node:
//!
//! - **TTL cache** ([`cache::TtlCache`]): bounded map with per-entry expiry
//!   and insertion-order eviction
//! - **Response cache** ([`cache::ResponseCache`]): fingerprinted responses
//!   with an early stale threshold for stale-while-revalidate serving
//! - **Request deduplication** ([`dedup::RequestDeduplicator`]): concurrent
//!   identical fetches collapse onto one upstream call
//! - **Operation pool** ([`pool::OperationPool`]): bounded concurrency with
//!   FIFO queueing, per-task timeouts and cancellation
//! - **Retry policy** ([`retry::RetryPolicy`]): exponential backoff with cap
//! - **Realtime registry** ([`realtime::ChannelRegistry`]): WebSocket client
//!   bookkeeping with rate limiting and heartbeat liveness
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    HTTP / WebSocket                     │
//! │                  (spyglass-server)                      │
//! └────────────┬────────────────────────────┬───────────────┘
//!              │                            │
//!              ▼                            ▼
//! ┌─────────────────────────┐   ┌───────────────────────────┐
//! │     ResourceService     │   │      ChannelRegistry      │
//! │  cache → dedup → pool   │   │  subscriptions, limits,   │
//! │  → retry → upstream     │   │  heartbeat, broadcast     │
//! └────────────┬────────────┘   └───────────────────────────┘
//!              │
//!              ▼
//! ┌─────────────────────────┐
//! │        NodeClient       │
//! │   (reqwest, permits)    │
//! └─────────────────────────┘
//! ```
//!
//! ## Request flow
//!
//! ```text
//! fetch_resource(endpoint)
//!   ├─ response cache fresh  → HIT
//!   ├─ response cache stale  → STALE (+ background revalidation)
//!   └─ miss
//!        └─ deduplicate(endpoint)
//!             └─ pool.submit
//!                  └─ retry
//!                       └─ NodeClient::fetch → cache.set → MISS
//! ```

pub mod cache;
pub mod config;
pub mod dedup;
pub mod pool;
pub mod realtime;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod types;
pub mod upstream;
