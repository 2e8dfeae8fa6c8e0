//! Shared types used across the caching and service layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Where a served response came from.
///
/// Stamped onto every HTTP response as the `X-Cache` header so operators can
/// read hit ratios straight out of access logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Served from cache, still fresh.
    Hit,
    /// Fetched from upstream on this request.
    Miss,
    /// Served from cache past its stale threshold; a background
    /// revalidation was triggered.
    Stale,
}

impl CacheStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource as handed to the HTTP layer: payload plus the metadata the
/// caching headers are built from.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub value: Arc<Value>,
    /// Hex-encoded content hash; doubles as the ETag value.
    pub fingerprint: String,
    pub status: CacheStatus,
    /// Remaining fresh window; becomes `Cache-Control: max-age`.
    pub fresh_for: Duration,
}

/// Topics the realtime push channel broadcasts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Blocks,
    Transactions,
    Validators,
}

impl Topic {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Validators => "validators",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
