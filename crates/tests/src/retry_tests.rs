//! Retry behavior against a flaky origin: transient answers are retried
//! with real backoff delays, non-transient answers are not, and when
//! every attempt fails the caller sees the last error.

use crate::helpers::{create_service_with, ServiceOptions};
use crate::mock_node::MockNode;
use serde_json::json;
use spyglass_core::retry::RetryPolicy;
use spyglass_core::service::ServiceError;
use spyglass_core::upstream::UpstreamError;
use std::time::{Duration, Instant};

fn quick_retries(max_retries: u32) -> ServiceOptions {
    ServiceOptions {
        retry: RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/block?height=5", json!({"height": 5})).await;
    node.fail_times("/block?height=5", 2).await;

    let service = create_service_with(&node.base_url(), quick_retries(3));
    let fetched = service.fetch_resource("/block?height=5").await.expect("recovers");

    assert_eq!(fetched.value["height"], 5);
    assert_eq!(node.hits("/block?height=5").await, 3, "two failures plus the success");
}

#[tokio::test]
async fn test_exhausted_retries_surface_the_last_error() {
    let node = MockNode::start().await.expect("mock node");
    node.fail_sequence("/status", &[500, 502, 503]).await;

    let service = create_service_with(&node.base_url(), quick_retries(2));
    let result = service.fetch_resource("/status").await;

    match result {
        Err(ServiceError::Upstream(error)) => {
            // Three attempts, and the error is the third answer, not the first.
            assert!(matches!(error.as_ref(), UpstreamError::Status { status: 503, .. }));
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }
    assert_eq!(node.hits("/status").await, 3);
}

#[tokio::test]
async fn test_non_transient_answer_is_not_retried() {
    let node = MockNode::start().await.expect("mock node");
    node.fail_with_status("/tx?hash=0xab", 5, 400).await;

    let service = create_service_with(&node.base_url(), quick_retries(3));
    let result = service.fetch_resource("/tx?hash=0xab").await;

    match result {
        Err(ServiceError::Upstream(error)) => {
            assert!(matches!(error.as_ref(), UpstreamError::Status { status: 400, .. }));
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }
    assert_eq!(node.hits("/tx?hash=0xab").await, 1, "a 400 gets exactly one attempt");
}

#[tokio::test]
async fn test_backoff_delays_are_actually_applied() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/validators", json!({"count": 4})).await;
    node.fail_times("/validators", 2).await;

    let options = ServiceOptions {
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    };
    let service = create_service_with(&node.base_url(), options);

    let start = Instant::now();
    service.fetch_resource("/validators").await.expect("recovers");
    let elapsed = start.elapsed();

    // Delays before the second and third attempts: 50ms + 100ms.
    assert!(elapsed >= Duration::from_millis(150), "expected backoff, took {elapsed:?}");
    assert_eq!(node.hits("/validators").await, 3);
}

#[tokio::test]
async fn test_success_after_retries_is_cached() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/status", json!({"ok": true})).await;
    node.fail_times("/status", 1).await;

    let service = create_service_with(&node.base_url(), quick_retries(2));
    service.fetch_resource("/status").await.expect("recovers");
    service.fetch_resource("/status").await.expect("cache hit");

    // The second fetch never reaches the origin.
    assert_eq!(node.hits("/status").await, 2);
    assert_eq!(service.stats().cache.hits, 1);
}
