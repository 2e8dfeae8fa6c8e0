//! Audit logging for admin mutations.
//!
//! Every cache mutation through the admin surface emits a structured
//! event on the `audit` tracing target, so operators can separate the
//! audit trail from ordinary application logs by filter alone.

use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

/// Mutations the admin surface can perform.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    /// Pattern invalidation of cached responses.
    Invalidate,
    /// Full cache clear.
    Clear,
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub operation: AuditOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(operation: AuditOperation) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation,
            client_ip: None,
            success: true,
            details: None,
        }
    }

    #[must_use]
    pub fn with_client_ip(mut self, addr: Option<SocketAddr>) -> Self {
        self.client_ip = addr.map(|a| a.ip().to_string());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Emits the event on the `audit` target.
    pub fn log(self) {
        info!(
            target: "audit",
            timestamp = %self.timestamp,
            operation = ?self.operation,
            client_ip = ?self.client_ip,
            success = self.success,
            details = ?self.details,
            "admin_audit"
        );
    }
}

/// Records a pattern invalidation and how much it removed.
pub fn log_invalidate(pattern: &str, removed: usize, client_ip: Option<SocketAddr>) {
    AuditEvent::new(AuditOperation::Invalidate)
        .with_client_ip(client_ip)
        .with_details(serde_json::json!({ "pattern": pattern, "removed": removed }))
        .log();
}

/// Records a full cache clear.
pub fn log_clear(client_ip: Option<SocketAddr>) {
    AuditEvent::new(AuditOperation::Clear).with_client_ip(client_ip).log();
}
