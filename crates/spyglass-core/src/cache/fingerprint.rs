//! Content fingerprinting for cached responses.
//!
//! A fingerprint is the SHA-256 hash of the canonical JSON serialization of
//! a response body, hex-encoded. Two responses with identical content get
//! identical fingerprints regardless of the upstream that produced them,
//! which is what makes `If-None-Match` revalidation work across restarts.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Computes the content fingerprint for a response body.
///
/// `serde_json` stores object members in sorted key order, so serialization
/// is canonical and the hash is stable across upstreams that emit the same
/// fields in a different order.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    // Serializing a Value cannot fail: keys are always strings.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Formats a fingerprint as a strong ETag header value.
#[must_use]
pub fn to_etag(fingerprint: &str) -> String {
    format!("\"{fingerprint}\"")
}

/// Extracts the fingerprint from an `If-None-Match` header value.
///
/// Strips the weak-validator prefix and surrounding quotes. A `*` wildcard
/// or an empty header yields `None`.
#[must_use]
pub fn from_etag(header: &str) -> Option<&str> {
    let trimmed = header.trim();
    let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    let inner = trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(trimmed);
    if inner.is_empty() || inner == "*" {
        None
    } else {
        Some(inner)
    }
}
