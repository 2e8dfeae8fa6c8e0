//! HTTP and WebSocket server for the spyglass explorer backend.
//!
//! Wires the [`ResourceService`] pipeline into an axum application:
//! cached resource routes with conditional GET support, the realtime
//! WebSocket endpoint, and the admin surface. Caching headers are
//! rendered by a middleware layer, not inside handlers.

pub mod admin;
pub mod middleware;
pub mod router;
pub mod ws;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use router::AppState;
use spyglass_core::config::AppConfig;
use spyglass_core::service::ResourceService;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Builds the complete application router.
///
/// The health and WebSocket routes carry only the request id layers;
/// API and admin routes get the full stack (concurrency limit, body
/// limit, compression, timeout, CORS, tracing, caching headers).
pub fn create_app(service: ResourceService, config: &AppConfig) -> Router {
    let state = AppState::new(service);
    let (set_request_id_public, propagate_request_id_public) =
        middleware::create_request_id_layers();
    let (set_request_id, propagate_request_id) = middleware::create_request_id_layers();

    let public = Router::new()
        .route("/health", get(router::handle_health))
        .route("/ws", get(ws::handle_upgrade))
        .with_state(state.clone())
        .layer(propagate_request_id_public)
        .layer(set_request_id_public);

    // Layers apply bottom-up on requests: the request id pair runs
    // first, the caching header layer last, right around the handler.
    let api = Router::new()
        .route("/api/blocks/{id}", get(router::handle_block))
        .route("/api/transactions/{hash}", get(router::handle_transaction))
        .route("/api/validators", get(router::handle_validators))
        .route("/api/status", get(router::handle_status))
        .route("/api/resources/batch", post(router::handle_batch))
        .merge(admin::create_admin_router())
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::inject_cache_headers))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id);

    public.merge(api)
}
