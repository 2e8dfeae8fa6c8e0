//! Integration tests for the spyglass explorer backend.
//!
//! This crate contains various test modules:
//!
//! - `dedup_tests`: concurrent fetches collapsing onto one origin flight
//! - `retry_tests`: backoff behavior against a flaky origin
//! - `staleness_tests`: stale-while-revalidate and expiry over real time
//! - `http_api_tests`: the HTTP surface end to end, caching headers included
//! - `realtime_tests`: the WebSocket endpoint driven by a real client
//! - `mock_node`: reusable mock origin node
//! - `helpers`: pipeline constructors, a served test app and polling utilities
//!
//! Every test runs against a mock origin on a random local port; nothing
//! here needs a live node.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package spyglass-tests
//! ```

#[cfg(test)]
mod dedup_tests;

#[cfg(test)]
mod retry_tests;



#[cfg(test)]
mod realtime_tests;

/// Shared test helpers
pub mod helpers;

/// Mock origin node for testing
pub mod mock_node;
