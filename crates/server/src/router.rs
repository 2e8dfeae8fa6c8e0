//! Public API handlers.
//!
//! Resource routes translate API paths into upstream node endpoints and
//! serve them through [`ResourceService::fetch_resource`], so every
//! response is cached, deduplicated and retried the same way. Handlers
//! attach a [`CacheHeaders`] extension instead of writing caching
//! headers themselves; the middleware layer renders them.

use crate::middleware::CacheHeaders;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::future;
use serde::Deserialize;
use serde_json::{json, Value};
use spyglass_core::cache::fingerprint;
use spyglass_core::service::{ResourceService, ServiceError};
use spyglass_core::types::CacheStatus;
use spyglass_core::upstream::UpstreamError;
use std::time::Instant;

/// Largest number of endpoints one batch request may carry.
pub const MAX_BATCH_SIZE: usize = 50;

type ErrorResponse = (StatusCode, Json<Value>);

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: ResourceService,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(service: ResourceService) -> Self {
        Self { service, started_at: Instant::now() }
    }
}

/// `GET /health`
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.service.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "cache_entries": stats.cache.size,
        "realtime_clients": stats.realtime.total_clients,
    }))
}

/// `GET /api/blocks/{id}` where `id` is a height or `latest`.
pub async fn handle_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match block_endpoint(&id) {
        Ok(endpoint) => serve_resource(&state, &headers, &endpoint).await,
        Err(message) => bad_request(message).into_response(),
    }
}

/// `GET /api/transactions/{hash}`
pub async fn handle_transaction(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    match transaction_endpoint(&hash) {
        Ok(endpoint) => serve_resource(&state, &headers, &endpoint).await,
        Err(message) => bad_request(message).into_response(),
    }
}

/// `GET /api/validators`
pub async fn handle_validators(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_resource(&state, &headers, "/validators").await
}

/// `GET /api/status`
pub async fn handle_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_resource(&state, &headers, "/status").await
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub endpoints: Vec<String>,
}

/// `POST /api/resources/batch`
///
/// Fetches every listed API path concurrently and returns the results
/// in request order. The aggregate `X-Cache` is `HIT` when everything
/// hit, `MISS` when everything missed, `PARTIAL` otherwise.
pub async fn handle_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Response {
    if request.endpoints.is_empty() {
        return bad_request("batch must list at least one endpoint").into_response();
    }
    if request.endpoints.len() > MAX_BATCH_SIZE {
        return bad_request("batch exceeds the endpoint limit").into_response();
    }

    let fetches = request.endpoints.iter().map(|path| {
        let service = state.service.clone();
        let path = path.clone();
        async move {
            match resolve_endpoint(&path) {
                Some(endpoint) => (path, Some(service.fetch_resource(&endpoint).await)),
                None => (path, None),
            }
        }
    });
    let outcomes = future::join_all(fetches).await;

    let mut statuses = Vec::with_capacity(outcomes.len());
    let mut results = Vec::with_capacity(outcomes.len());
    for (path, outcome) in outcomes {
        match outcome {
            Some(Ok(resource)) => {
                statuses.push(Some(resource.status));
                results.push(json!({
                    "endpoint": path,
                    "cache": resource.status.as_str(),
                    "data": resource.value,
                }));
            }
            Some(Err(error)) => {
                statuses.push(None);
                results.push(json!({ "endpoint": path, "error": error.to_string() }));
            }
            None => {
                statuses.push(None);
                results.push(json!({ "endpoint": path, "error": "unsupported endpoint" }));
            }
        }
    }

    let aggregate = aggregate_status(&statuses);
    (
        StatusCode::OK,
        Extension(CacheHeaders::aggregate(aggregate)),
        Json(json!({ "results": results })),
    )
        .into_response()
}

/// The shared resource flow: conditional `If-None-Match` answer first,
/// then a cached fetch with the caching metadata attached.
async fn serve_resource(state: &AppState, headers: &HeaderMap, endpoint: &str) -> Response {
    if let Some(fingerprint) = matching_etag(state, headers, endpoint) {
        return (StatusCode::NOT_MODIFIED, Extension(CacheHeaders::not_modified(fingerprint)))
            .into_response();
    }

    match state.service.fetch_resource(endpoint).await {
        Ok(resource) => {
            (StatusCode::OK, Extension(CacheHeaders::for_resource(&resource)), Json(resource.value))
                .into_response()
        }
        Err(error) => error_response(&error).into_response(),
    }
}

/// The first `If-None-Match` candidate matching the live cache entry
/// for `endpoint`, if any.
fn matching_etag(state: &AppState, headers: &HeaderMap, endpoint: &str) -> Option<String> {
    let raw = headers.get(header::IF_NONE_MATCH)?.to_str().ok()?;
    etag_candidates(raw)
        .find(|candidate| state.service.etag_matches(endpoint, candidate))
        .map(str::to_string)
}

/// Splits an `If-None-Match` value into bare fingerprints, dropping
/// quotes and weak-validator prefixes.
fn etag_candidates(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').filter_map(fingerprint::from_etag)
}

/// Maps an API path from a batch request to its upstream endpoint.
fn resolve_endpoint(path: &str) -> Option<String> {
    if let Some(id) = path.strip_prefix("/api/blocks/") {
        return block_endpoint(id).ok();
    }
    if let Some(hash) = path.strip_prefix("/api/transactions/") {
        return transaction_endpoint(hash).ok();
    }
    match path {
        "/api/validators" => Some("/validators".to_string()),
        "/api/status" => Some("/status".to_string()),
        _ => None,
    }
}

fn block_endpoint(id: &str) -> Result<String, &'static str> {
    if id == "latest" {
        return Ok("/block".to_string());
    }
    match id.parse::<u64>() {
        Ok(height) => Ok(format!("/block?height={height}")),
        Err(_) => Err("block id must be a height or 'latest'"),
    }
}

fn transaction_endpoint(hash: &str) -> Result<String, &'static str> {
    let hash = hash.strip_prefix("0x").unwrap_or(hash);
    if hash.is_empty() || hash.len() > 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("transaction hash must be hex");
    }
    Ok(format!("/tx?hash=0x{hash}"))
}

fn aggregate_status(statuses: &[Option<CacheStatus>]) -> &'static str {
    if statuses.iter().all(|status| *status == Some(CacheStatus::Hit)) {
        "HIT"
    } else if statuses.iter().all(|status| *status == Some(CacheStatus::Miss)) {
        "MISS"
    } else {
        "PARTIAL"
    }
}

fn bad_request(message: &str) -> ErrorResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn error_response(error: &ServiceError) -> ErrorResponse {
    let status = match error {
        ServiceError::Upstream(upstream) => upstream_status(upstream),
        ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

fn upstream_status(error: &UpstreamError) -> StatusCode {
    match error {
        UpstreamError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
        UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        UpstreamError::LimiterClosed | UpstreamError::Init(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}
