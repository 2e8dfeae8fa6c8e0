//! HTTP middleware for the explorer API.
//!
//! Two concerns live here: request correlation ids (set + propagate via
//! tower-http) and the caching response headers. Handlers never touch
//! `ETag` / `Cache-Control` / `X-Cache` themselves; they attach a
//! [`CacheHeaders`] extension and the header layer writes the actual
//! headers on the way out.

pub mod cache_headers;
pub mod correlation_id;

pub use cache_headers::{inject_cache_headers, CacheHeaders, X_CACHE};
pub use correlation_id::{create_request_id_layers, UuidRequestIdGenerator, X_REQUEST_ID};
