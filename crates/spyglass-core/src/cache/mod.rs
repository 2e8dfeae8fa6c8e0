//! Caching layer: bounded TTL storage plus the response-specific tier.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ResponseCache                 │
//! │   fingerprints, stale threshold, ETags,      │
//! │   pattern invalidation                       │
//! │  ┌────────────────────────────────────────┐  │
//! │  │               TtlCache                 │  │
//! │  │  per-entry expiry, insertion-order     │  │
//! │  │  eviction, hit/miss accounting, sweep  │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Conventions
//!
//! - `Option<T>` means an expected cache miss, never a failure.
//! - `Result<T, CacheError>` appears only on construction; a zero capacity
//!   is a configuration bug, not a runtime condition.
//! - Lookups are synchronous. Only the background sweep is a task.

pub mod fingerprint;
pub mod response_cache;
pub mod ttl_cache;

pub use response_cache::{CachedLookup, ResponseCache};
pub use ttl_cache::{CacheStats, TtlCache};

/// Errors that occur during cache construction.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Invalid configuration parameter (typically zero capacity).
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}
