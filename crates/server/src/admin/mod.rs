//! Admin surface: stats, pattern invalidation and clear-all.
//!
//! Served on the same listener as the public API under `/admin`. Every
//! mutation is audit-logged with the caller's address; see [`audit`].

pub mod audit;

use crate::router::AppState;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use spyglass_core::service::ServiceStats;
use std::net::SocketAddr;
use tracing::info;

/// The admin routes, to be merged into the main router.
pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(handle_stats))
        .route("/admin/invalidate", post(handle_invalidate))
        .route("/admin/clear", post(handle_clear))
}

/// `GET /admin/stats`
pub async fn handle_stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.service.stats())
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

/// `POST /admin/invalidate`
///
/// Removes cached responses whose key matches the pattern (regex, or
/// plain substring when the regex does not compile) and reports the
/// count.
pub async fn handle_invalidate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<InvalidateRequest>,
) -> (StatusCode, Json<Value>) {
    if request.pattern.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "pattern must not be empty" })),
        );
    }

    let removed = state.service.invalidate(&request.pattern);
    info!(pattern = %request.pattern, removed, "admin invalidation");
    audit::log_invalidate(&request.pattern, removed, Some(addr));
    (StatusCode::OK, Json(json!({ "pattern": request.pattern, "removed": removed })))
}

/// `POST /admin/clear`
pub async fn handle_clear(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    state.service.clear_all();
    info!("admin cache clear");
    audit::log_clear(Some(addr));
    Json(json!({ "cleared": true }))
}
