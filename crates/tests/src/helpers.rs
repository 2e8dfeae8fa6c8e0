//! Shared constructors and timing utilities for the integration tests.
//!
//! Timing-sensitive assertions poll with a timeout instead of sleeping a
//! fixed amount: positive cases pass as soon as the condition holds, and
//! the timeout keeps slow CI machines from flaking.

use spyglass_core::cache::ResponseCache;
use spyglass_core::config::AppConfig;
use spyglass_core::dedup::RequestDeduplicator;
use spyglass_core::pool::OperationPool;
use spyglass_core::realtime::{ChannelRegistry, RealtimeConfig};
use spyglass_core::retry::RetryPolicy;
use spyglass_core::service::ResourceService;
use spyglass_core::upstream::{NodeClient, UpstreamConfig};
use spyglass_server::create_app;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Knobs for the assembled test pipeline. Defaults keep retries fast
/// and the pool small so tests finish quickly.
pub struct ServiceOptions {
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub max_concurrent: usize,
    pub task_timeout: Duration,
    pub realtime: RealtimeConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 10,
                backoff_multiplier: 2.0,
            },
            cache_ttl: Duration::from_secs(60),
            max_concurrent: 4,
            task_timeout: Duration::from_secs(2),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Builds the full fetch pipeline against `base_url` with default options.
#[must_use]
pub fn create_service(base_url: &str) -> ResourceService {
    create_service_with(base_url, ServiceOptions::default())
}

/// Builds the full fetch pipeline against `base_url`.
#[must_use]
pub fn create_service_with(base_url: &str, options: ServiceOptions) -> ResourceService {
    let node = NodeClient::new(&UpstreamConfig {
        base_url: base_url.to_string(),
        request_timeout_seconds: 5,
        connect_timeout_seconds: 2,
        ..Default::default()
    })
    .expect("node client");

    ResourceService::new(
        Arc::new(ResponseCache::new(128).expect("cache")),
        Arc::new(RequestDeduplicator::new()),
        Arc::new(
            OperationPool::new(options.max_concurrent, options.task_timeout).expect("pool"),
        ),
        Arc::new(node),
        Arc::new(ChannelRegistry::new(options.realtime)),
        options.retry,
        options.cache_ttl,
    )
}

/// The full HTTP application served on a random local port.
///
/// Admin routes extract the peer address, so the app has to run behind a
/// real listener with connect info rather than being driven in-process.
pub struct TestServer {
    pub addr: SocketAddr,
    pub service: ResourceService,
    server_handle: JoinHandle<()>,
}

impl TestServer {
    /// Serves `create_app` over `service` on an ephemeral port.
    pub async fn start(service: ResourceService) -> Result<Self, std::io::Error> {
        let app = create_app(service.clone(), &AppConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server_handle = tokio::spawn(async move {
            let server =
                axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
            if let Err(e) = server.await {
                eprintln!("test server error: {e}");
            }
        });

        Ok(Self { addr, service, server_handle })
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// Polls until `check` returns true, or times out.
///
/// Returns `Ok(())` once the condition holds, `Err(msg)` on timeout.
pub async fn poll_until<F>(
    condition_name: &str,
    timeout: Duration,
    mut check: F,
) -> Result<(), String>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return Ok(());
        }
        sleep(Duration::from_millis(20)).await;
    }
    Err(format!("{condition_name} did not become true within {timeout:?}"))
}
