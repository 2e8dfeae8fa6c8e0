//! Mock origin node for integration testing.
//!
//! A real HTTP server on an ephemeral port that answers the node API
//! paths the gateway fetches (`/block?height=N`, `/status` and so on).
//! Responses are keyed by the full path-and-query string. Each path
//! counts its hits, can be scripted to fail a number of times before
//! recovering, and the whole server can delay every answer to widen
//! race windows in concurrency tests.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Default)]
struct MockNodeState {
    /// Response body per path-and-query key.
    responses: RwLock<HashMap<String, Value>>,
    /// Scripted failure statuses per path, consumed front to back.
    failures: RwLock<HashMap<String, VecDeque<u16>>>,
    hits: RwLock<HashMap<String, usize>>,
    delay: RwLock<Option<Duration>>,
}

/// A mock origin node listening on a random local port.
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<MockNodeState>,
    server_handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockNode {
    /// Starts the mock node on a random available port.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to a local port or
    /// retrieve the bound address.
    pub async fn start() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockNodeState::default());
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let router = Router::new().fallback(handle_request).with_state(Arc::clone(&state));
        let server_handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            });
            if let Err(e) = server.await {
                eprintln!("mock node server error: {e}");
            }
        });

        Ok(Self { addr, state, server_handle, shutdown_tx })
    }

    /// Base URL to hand to the gateway's upstream config.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Registers the response body for a path, e.g. `/block?height=5`.
    pub async fn respond(&self, path: &str, body: Value) {
        self.state.responses.write().await.insert(path.to_string(), body);
    }

    /// Scripts the next `attempts` requests to `path` to answer 503.
    pub async fn fail_times(&self, path: &str, attempts: u32) {
        self.fail_with_status(path, attempts, 503).await;
    }

    /// Scripts the next `attempts` requests to `path` to answer `status`.
    pub async fn fail_with_status(&self, path: &str, attempts: u32, status: u16) {
        let statuses: Vec<u16> = (0..attempts).map(|_| status).collect();
        self.fail_sequence(path, &statuses).await;
    }

    /// Scripts the next requests to `path` to answer the given statuses
    /// in order, one per request.
    pub async fn fail_sequence(&self, path: &str, statuses: &[u16]) {
        self.state
            .failures
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .extend(statuses.iter().copied());
    }

    /// Delays every answer, widening race windows for concurrency tests.
    pub async fn set_delay(&self, delay: Duration) {
        *self.state.delay.write().await = Some(delay);
    }

    /// How many requests `path` has received, scripted failures included.
    pub async fn hits(&self, path: &str) -> usize {
        self.state.hits.read().await.get(path).copied().unwrap_or(0)
    }

    /// Total requests across every path.
    pub async fn total_hits(&self) -> usize {
        self.state.hits.read().await.values().sum()
    }

    /// Shuts down the server.
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.server_handle.abort();
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.server_handle.abort();
    }
}

async fn handle_request(State(state): State<Arc<MockNodeState>>, uri: Uri) -> Response {
    let key = uri.path_and_query().map_or_else(|| uri.path().to_string(), ToString::to_string);
    *state.hits.write().await.entry(key.clone()).or_insert(0) += 1;

    let delay = *state.delay.read().await;
    if let Some(delay) = delay {
        sleep(delay).await;
    }

    let scripted = state
        .failures
        .write()
        .await
        .get_mut(&key)
        .and_then(VecDeque::pop_front);
    if let Some(status) = scripted {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "scripted failure").into_response();
    }

    match state.responses.read().await.get(&key) {
        Some(body) => Json(body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "no mock response for this path").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_node_serves_registered_response() {
        let node = MockNode::start().await.expect("mock node");
        node.respond("/status", json!({"chain_id": "test-1"})).await;

        let body: Value = reqwest::get(format!("{}/status", node.base_url()))
            .await
            .expect("request")
            .json()
            .await
            .expect("json body");

        assert_eq!(body["chain_id"], "test-1");
        assert_eq!(node.hits("/status").await, 1);
    }

    #[tokio::test]
    async fn test_mock_node_keys_on_path_and_query() {
        let node = MockNode::start().await.expect("mock node");
        node.respond("/block?height=1", json!({"height": 1})).await;
        node.respond("/block?height=2", json!({"height": 2})).await;

        let url = format!("{}/block?height=2", node.base_url());
        let body: Value = reqwest::get(url).await.expect("request").json().await.expect("json");
        assert_eq!(body["height"], 2);
        assert_eq!(node.hits("/block?height=2").await, 1);
        assert_eq!(node.hits("/block?height=1").await, 0);
    }

    #[tokio::test]
    async fn test_unregistered_path_is_404() {
        let node = MockNode::start().await.expect("mock node");
        let response =
            reqwest::get(format!("{}/nope", node.base_url())).await.expect("request");
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_scripted_failures_drain() {
        let node = MockNode::start().await.expect("mock node");
        node.respond("/validators", json!({"count": 4})).await;
        node.fail_times("/validators", 2).await;

        let url = format!("{}/validators", node.base_url());
        assert_eq!(reqwest::get(&url).await.expect("request").status().as_u16(), 503);
        assert_eq!(reqwest::get(&url).await.expect("request").status().as_u16(), 503);
        assert_eq!(reqwest::get(&url).await.expect("request").status().as_u16(), 200);
        assert_eq!(node.hits("/validators").await, 3);
    }
}
