//! Single-flight behavior of the full pipeline: concurrent fetches for
//! the same endpoint must collapse onto one origin request, and every
//! caller, leader or joiner, must see that one outcome.

use crate::helpers::create_service;
use crate::mock_node::MockNode;
use futures::future::join_all;
use serde_json::json;
use spyglass_core::service::ServiceError;
use spyglass_core::types::CacheStatus;
use spyglass_core::upstream::UpstreamError;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_fetches_collapse_to_one_origin_hit() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/status", json!({"sync_info": {"latest_block_height": "42"}})).await;
    // Keep the flight open long enough for every caller to join it.
    node.set_delay(Duration::from_millis(50)).await;

    let service = create_service(&node.base_url());
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.fetch_resource("/status").await })
        })
        .collect();

    let results = join_all(tasks).await;
    let mut fingerprints = Vec::new();
    for joined in results {
        let fetched = joined.expect("task").expect("fetch");
        assert_eq!(fetched.status, CacheStatus::Miss);
        assert_eq!(fetched.value["sync_info"]["latest_block_height"], "42");
        fingerprints.push(fetched.fingerprint);
    }
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), 1, "every caller shares the leader's fingerprint");

    assert_eq!(node.hits("/status").await, 1);
    let stats = service.stats();
    assert_eq!(stats.dedup.flights_led, 1);
    assert_eq!(stats.dedup.callers_joined, 7);
    assert_eq!(stats.dedup.in_flight, 0);
}

#[tokio::test]
async fn test_fetch_after_settle_is_served_from_cache() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/validators", json!({"count": 4})).await;

    let service = create_service(&node.base_url());
    let first = service.fetch_resource("/validators").await.expect("miss path");
    assert_eq!(first.status, CacheStatus::Miss);

    let second = service.fetch_resource("/validators").await.expect("hit path");
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(second.fingerprint, first.fingerprint);

    assert_eq!(node.hits("/validators").await, 1);
    assert_eq!(service.stats().dedup.flights_led, 1);
}

#[tokio::test]
async fn test_failed_flight_is_shared_and_cleared() {
    let node = MockNode::start().await.expect("mock node");
    // No response registered: the origin answers 404, which is not
    // retried, so the whole collapsed flight costs one request.
    node.set_delay(Duration::from_millis(50)).await;

    let service = create_service(&node.base_url());
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.fetch_resource("/block?height=9").await })
        })
        .collect();

    for joined in join_all(tasks).await {
        match joined.expect("task") {
            Err(ServiceError::Upstream(error)) => {
                assert!(matches!(error.as_ref(), UpstreamError::Status { status: 404, .. }));
            }
            other => panic!("expected shared upstream failure, got {other:?}"),
        }
    }

    assert_eq!(node.hits("/block?height=9").await, 1);
    let stats = service.stats();
    assert_eq!(stats.dedup.flights_led, 1);
    assert_eq!(stats.dedup.in_flight, 0);

    // A failure is not cached; the next caller leads a fresh flight.
    node.respond("/block?height=9", json!({"height": 9})).await;
    let fetched = service.fetch_resource("/block?height=9").await.expect("fresh flight");
    assert_eq!(fetched.value["height"], 9);
    assert_eq!(node.hits("/block?height=9").await, 2);
    assert_eq!(service.stats().dedup.flights_led, 2);
}

#[tokio::test]
async fn test_distinct_endpoints_fly_separately() {
    let node = MockNode::start().await.expect("mock node");
    node.respond("/block?height=1", json!({"height": 1})).await;
    node.respond("/block?height=2", json!({"height": 2})).await;
    node.set_delay(Duration::from_millis(30)).await;

    let service = create_service(&node.base_url());
    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.fetch_resource("/block?height=1").await })
    };
    let second = {
        let service = service.clone();
        tokio::spawn(async move { service.fetch_resource("/block?height=2").await })
    };

    let one = first.await.expect("task").expect("fetch");
    let two = second.await.expect("task").expect("fetch");
    assert_eq!(one.value["height"], 1);
    assert_eq!(two.value["height"], 2);

    assert_eq!(node.hits("/block?height=1").await, 1);
    assert_eq!(node.hits("/block?height=2").await, 1);
    let stats = service.stats();
    assert_eq!(stats.dedup.flights_led, 2);
    assert_eq!(stats.dedup.callers_joined, 0);
}
