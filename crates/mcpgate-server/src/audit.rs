//! Audit sink
//!
//! Violations and policy decisions go to the audit sink best-effort: a sink
//! failure is logged and never fails the request. The default sink writes
//! structured JSON events through `tracing`; the in-memory sink backs tests
//! and the control plane's relational sink lives outside this repo.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use mcpgate_plugins::{PluginAction, Violation};
use mcpgate_protocol::Direction;

/// One audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Tenant the request belonged to
    pub tenant_id: String,
    /// Session, when one existed
    pub session_id: Option<String>,
    /// Request id for correlation
    pub request_id: String,
    /// Pipeline direction the chain ran at
    pub direction: Direction,
    /// Aggregate action
    pub action: PluginAction,
    /// Chain reason string
    pub reason: String,
    /// Plugin that blocked, when one did
    pub blocked_by: Option<String>,
    /// Violations recorded by the chain
    pub violations: Vec<Violation>,
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Write one record; implementations swallow their own failures
    async fn record(&self, entry: AuditEntry);
}

/// Sink that emits structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        match serde_json::to_value(&entry) {
            Ok(payload) => info!(audit = %payload, "audit event"),
            Err(e) => warn!(error = %e, "failed to serialize audit entry"),
        }
    }
}

/// In-memory sink for tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded entries so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

impl AuditEntry {
    /// Entry for one chain outcome
    pub fn new(
        tenant_id: impl Into<String>,
        request_id: impl Into<String>,
        direction: Direction,
        action: PluginAction,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tenant_id: tenant_id.into(),
            session_id: None,
            request_id: request_id.into(),
            direction,
            action,
            reason: String::new(),
            blocked_by: None,
            violations: Vec::new(),
        }
    }

    /// Attach the session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the chain reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Attach the blocking plugin
    pub fn with_blocked_by(mut self, plugin: Option<String>) -> Self {
        self.blocked_by = plugin;
        self
    }

    /// Attach violations
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    /// Compact JSON form, matching what the relational sink stores
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "organization_id": self.tenant_id,
            "session_id": self.session_id,
            "request_id": self.request_id,
            "direction": self.direction,
            "action": self.action,
            "blocked_by": self.blocked_by,
            "violations": self.violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_collects_entries() {
        let sink = MemoryAuditSink::new();
        sink.record(
            AuditEntry::new("acme", "r1", Direction::Inbound, PluginAction::Block)
                .with_reason("plugin timeout")
                .with_violations(vec![Violation::new("keyword", "deny", "high")]),
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, "plugin timeout");
        assert_eq!(entries[0].to_json()["organization_id"], "acme");
    }
}
