//! Gateway error types and wire mappings
//!
//! Every error that can surface to a client maps to both an HTTP status and
//! a JSON-RPC code. Policy blocks carry a violation summary (type, category,
//! severity) and never the plugin's internal reason string.

use serde::Serialize;

use mcpgate_backend::BackendError;
use mcpgate_plugins::{PluginError, Violation};
use mcpgate_protocol::ProtocolError;
use mcpgate_session::SessionError;

/// Result type for gateway operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Client-safe violation summary
#[derive(Debug, Clone, Serialize)]
pub struct ViolationSummary {
    /// Violation type
    pub violation_type: String,
    /// Category
    pub category: String,
    /// Severity
    pub severity: String,
}

impl From<&Violation> for ViolationSummary {
    fn from(violation: &Violation) -> Self {
        Self {
            violation_type: violation.violation_type.clone(),
            category: violation.category.clone(),
            severity: violation.severity.clone(),
        }
    }
}

/// Gateway error surface
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Codec-level failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session registry failure
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The plugin chain rejected the request
    #[error("blocked by policy")]
    PolicyBlocked {
        /// Client-safe summaries of the violations
        violations: Vec<ViolationSummary>,
    },

    /// An enforcing plugin exceeded its timeout
    #[error("plugin timeout{}", .plugin.as_deref().map(|p| format!(": {p}")).unwrap_or_default())]
    PluginTimeout {
        /// The plugin that timed out, when known
        plugin: Option<String>,
    },

    /// A plugin failed in enforcing mode
    #[error("plugin failure: {0}")]
    Plugin(PluginError),

    /// Backend invocation failure
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// No route for the method in the tenant's namespace
    #[error("no route for method: {method}")]
    Routing {
        /// The unrouteable method
        method: String,
    },

    /// Request could not be authenticated
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Content negotiation failed
    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    /// The overall request deadline expired
    #[error("request deadline exceeded")]
    Timeout,

    /// Tenant is inactive or unknown
    #[error("tenant unavailable: {0}")]
    TenantUnavailable(String),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else
    #[error("internal server error: {0}")]
    Internal(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Policy block from chain violations
    pub fn blocked(violations: &[Violation]) -> Self {
        Self::PolicyBlocked {
            violations: violations.iter().map(ViolationSummary::from).collect(),
        }
    }

    /// Metrics key for this error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Session(SessionError::AlreadyDiscarded(_)) => "replay_lost",
            Self::Session(_) => "session",
            Self::PolicyBlocked { .. } => "policy_blocked",
            Self::PluginTimeout { .. } => "plugin_timeout",
            Self::Plugin(_) => "plugin",
            Self::Backend(BackendError::Timeout { .. }) => "backend_timeout",
            Self::Backend(_) => "backend",
            Self::Routing { .. } => "routing",
            Self::Authentication(_) => "authentication",
            Self::NotAcceptable(_) => "not_acceptable",
            Self::Timeout => "timeout",
            Self::TenantUnavailable(_) => "tenant",
            Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }

    /// JSON-RPC error code
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::Protocol(err) => err.jsonrpc_code(),
            Self::PolicyBlocked { .. } => -32010,
            Self::PluginTimeout { .. } => -32011,
            Self::Backend(
                BackendError::Unavailable { .. }
                | BackendError::UnknownTarget(_)
                | BackendError::Timeout { .. }
                | BackendError::Connection(_)
                | BackendError::Status { .. },
            ) => -32012,
            Self::Timeout => -32012,
            Self::Routing { .. } => -32601,
            Self::Session(_) => -32600,
            Self::Serialization(_) => -32602,
            _ => -32603,
        }
    }

    /// HTTP status
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Protocol(ProtocolError::UnsupportedMethod(_)) => 404,
            Self::Protocol(_) => 400,
            Self::Session(SessionError::AlreadyDiscarded(_)) => 410,
            Self::Session(SessionError::NotFound(_) | SessionError::Closed { .. }) => 410,
            Self::Session(SessionError::Capacity { .. }) => 503,
            Self::Session(_) => 400,
            Self::PolicyBlocked { .. } => 403,
            Self::PluginTimeout { .. } => 504,
            Self::Plugin(_) => 500,
            Self::Backend(BackendError::Timeout { .. }) => 504,
            Self::Backend(_) => 502,
            Self::Routing { .. } => 404,
            Self::Authentication(_) => 401,
            Self::NotAcceptable(_) => 406,
            Self::Timeout => 504,
            Self::TenantUnavailable(_) => 403,
            Self::Configuration(_) => 500,
            Self::Internal(_) | Self::Io(_) => 500,
            Self::Serialization(_) => 400,
        }
    }

    /// Client-facing message; policy blocks keep their summaries, internal
    /// detail stays out of the body
    pub fn client_message(&self) -> String {
        match self {
            Self::PolicyBlocked { .. } => "blocked by policy".to_string(),
            Self::PluginTimeout { .. } => "plugin timeout".to_string(),
            Self::Internal(_) | Self::Io(_) | Self::Configuration(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Structured error data for JSON-RPC error bodies
    pub fn error_data(&self) -> Option<serde_json::Value> {
        match self {
            Self::PolicyBlocked { violations } => {
                Some(serde_json::json!({"violations": violations}))
            }
            _ => None,
        }
    }
}

impl From<PluginError> for ServerError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Timeout(name) => Self::PluginTimeout { plugin: Some(name) },
            other => Self::Plugin(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_plugins::Violation;

    #[test]
    fn policy_block_mapping() {
        let err = ServerError::blocked(&[Violation::new("keyword", "deny", "high")]);
        assert_eq!(err.jsonrpc_code(), -32010);
        assert_eq!(err.http_status(), 403);
        let data = err.error_data().unwrap();
        assert_eq!(data["violations"][0]["category"], "deny");
        // The internal reason never leaks.
        assert_eq!(err.client_message(), "blocked by policy");
    }

    #[test]
    fn timeout_mappings() {
        let err = ServerError::PluginTimeout { plugin: None };
        assert_eq!(err.jsonrpc_code(), -32011);
        assert_eq!(err.http_status(), 504);

        let err = ServerError::Backend(BackendError::Timeout {
            target: "b".to_string(),
            elapsed_ms: 100,
        });
        assert_eq!(err.jsonrpc_code(), -32012);
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn backend_unavailable_mapping() {
        let err = ServerError::Backend(BackendError::unavailable("b", "unhealthy"));
        assert_eq!(err.jsonrpc_code(), -32012);
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn replay_loss_is_410() {
        let err = ServerError::Session(SessionError::AlreadyDiscarded("s".to_string()));
        assert_eq!(err.http_status(), 410);
        assert_eq!(err.kind(), "replay_lost");
    }
}
