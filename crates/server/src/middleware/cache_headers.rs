//! Caching response headers as a middleware layer.
//!
//! Resource handlers attach a [`CacheHeaders`] extension to their
//! response; this layer turns it into the actual `ETag`,
//! `Cache-Control` and `X-Cache` headers. Responses without the
//! extension pass through untouched.

use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use spyglass_core::cache::fingerprint;
use spyglass_core::types::FetchedResource;
use std::time::Duration;

/// Header reporting where the response body came from.
pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response metadata the header layer renders.
#[derive(Debug, Clone)]
pub struct CacheHeaders {
    /// `X-Cache` value: `HIT`, `MISS`, `STALE`, or `PARTIAL` for batches.
    pub cache_status: &'static str,
    /// Content fingerprint; rendered as a quoted `ETag` when present.
    pub fingerprint: Option<String>,
    /// Remaining fresh window; rendered as `Cache-Control: max-age`.
    pub fresh_for: Option<Duration>,
}

impl CacheHeaders {
    /// Headers for a full resource response.
    #[must_use]
    pub fn for_resource(resource: &FetchedResource) -> Self {
        Self {
            cache_status: resource.status.as_str(),
            fingerprint: Some(resource.fingerprint.clone()),
            fresh_for: Some(resource.fresh_for),
        }
    }

    /// Headers for a `304 Not Modified` answer: the matched ETag, no
    /// freshness claim.
    #[must_use]
    pub fn not_modified(fingerprint: String) -> Self {
        Self { cache_status: "HIT", fingerprint: Some(fingerprint), fresh_for: None }
    }

    /// Headers for a batch response: only the aggregate `X-Cache`.
    #[must_use]
    pub fn aggregate(cache_status: &'static str) -> Self {
        Self { cache_status, fingerprint: None, fresh_for: None }
    }
}

/// Writes the caching headers described by the response's
/// [`CacheHeaders`] extension.
pub async fn inject_cache_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let Some(meta) = response.extensions_mut().remove::<CacheHeaders>() else {
        return response;
    };

    let headers = response.headers_mut();
    headers.insert(X_CACHE.clone(), HeaderValue::from_static(meta.cache_status));
    if let Some(fp) = &meta.fingerprint {
        if let Ok(value) = HeaderValue::from_str(&fingerprint::to_etag(fp)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Some(fresh_for) = meta.fresh_for {
        let value = format!("public, max-age={}", fresh_for.as_secs());
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
    response
}
