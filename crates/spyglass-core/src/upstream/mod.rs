//! HTTP client for the origin node API.
//!
//! [`NodeClient`] issues single-attempt GET requests against the
//! configured node; retry scheduling lives with the caller so that
//! backoff policy and error classification stay in one place. Request
//! concurrency toward the node is capped with a semaphore, and permit
//! acquisition itself is bounded so a saturated client fails fast
//! instead of piling up waiters.

use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{trace, warn};

/// Longest upstream error body echoed into our own errors.
const MAX_ERROR_BODY: usize = 256;

/// Errors from origin fetches.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request or permit acquisition exceeded its deadline.
    #[error("Upstream request timeout")]
    Timeout,

    /// Could not reach the node. The message is sanitized and never
    /// echoes addresses.
    #[error("Upstream connection failed: {0}")]
    ConnectionFailed(String),

    /// Node answered with a non-2xx status.
    #[error("Upstream HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Node answered 2xx with a body that is not valid JSON.
    #[error("Upstream response decode failed: {0}")]
    Decode(String),

    /// Concurrency limiter is closed; only happens during shutdown.
    #[error("Upstream concurrency limiter closed")]
    LimiterClosed,

    /// Client construction or configuration failure.
    #[error("Upstream client init failed: {0}")]
    Init(String),
}

impl UpstreamError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Timeouts, connect failures and 5xx/429 answers are worth another
    /// attempt; 4xx answers and decode failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) => true,
            Self::Status { status, .. } => (500..=599).contains(status) || *status == 429,
            Self::Decode(_) | Self::LimiterClosed | Self::Init(_) => false,
        }
    }
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_concurrent_requests() -> usize {
    64
}

fn default_permit_timeout_ms() -> u64 {
    500
}

/// Origin node client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the node API, e.g. `http://127.0.0.1:26657`.
    pub base_url: String,

    /// Whole-request deadline per attempt.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// TCP connect deadline.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// In-flight request cap toward the node.
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// How long a request waits for a free slot before failing with
    /// [`UpstreamError::Timeout`].
    #[serde(default = "default_permit_timeout_ms")]
    pub permit_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:26657".to_string(),
            request_timeout_seconds: default_request_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            concurrent_requests: default_concurrent_requests(),
            permit_timeout_ms: default_permit_timeout_ms(),
        }
    }
}

/// HTTP client for one origin node, with a concurrency cap.
pub struct NodeClient {
    client: Client,
    base_url: String,
    permits: Arc<Semaphore>,
    permit_timeout: Duration,
}

impl NodeClient {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Init`] for an empty base URL, a zero
    /// concurrency cap, or a reqwest build failure.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        if config.base_url.trim().is_empty() {
            return Err(UpstreamError::Init("base_url must not be empty".to_string()));
        }
        if config.concurrent_requests == 0 {
            return Err(UpstreamError::Init("concurrent_requests must be > 0".to_string()));
        }

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("spyglass/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build upstream http client");
                UpstreamError::Init(format!("http client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            permits: Arc::new(Semaphore::new(config.concurrent_requests)),
            permit_timeout: Duration::from_millis(config.permit_timeout_ms),
        })
    }

    /// Maps client-side failures to stable messages with no addresses or
    /// internals in them.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() || error.is_decode() {
            "response body error".to_string()
        } else if error.is_redirect() {
            "unexpected redirect".to_string()
        } else {
            "network error".to_string()
        }
    }

    fn join_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Fetches `path` from the node and parses the body as JSON.
    ///
    /// One attempt, no retries.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] when no request slot frees up in time
    ///   or the request itself times out
    /// - [`UpstreamError::Status`] for non-2xx answers, body truncated
    /// - [`UpstreamError::ConnectionFailed`] for network failures
    /// - [`UpstreamError::Decode`] for unparseable 2xx bodies
    pub async fn fetch(&self, path: &str) -> Result<Value, UpstreamError> {
        let _permit =
            tokio::time::timeout(self.permit_timeout, Arc::clone(&self.permits).acquire_owned())
                .await
                .map_err(|_| {
                    warn!(
                        path,
                        available_permits = self.permits.available_permits(),
                        "upstream permit acquisition timed out"
                    );
                    UpstreamError::Timeout
                })?
                .map_err(|_| UpstreamError::LimiterClosed)?;

        let url = self.join_url(path);
        trace!(path, available_permits = self.permits.available_permits(), "upstream fetch");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(UpstreamError::Timeout),
            Err(e) => return Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))),
        };

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let body = if raw.len() > MAX_ERROR_BODY {
                format!("{}... (truncated)", &raw[..MAX_ERROR_BODY])
            } else {
                raw
            };
            return Err(UpstreamError::Status { status: status.as_u16(), body });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(UpstreamError::Timeout),
            Err(e) => return Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))),
        };
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    #[cfg(test)]
    pub(crate) fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}
