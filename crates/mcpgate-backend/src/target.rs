//! Backend target configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProtocol {
    /// JSON-RPC over HTTP POST
    Http,
    /// JSON-RPC over a persistent WebSocket
    #[serde(rename = "websocket")]
    WebSocket,
    /// Line-delimited JSON over a child process's stdio
    Stdio,
}

/// One configured backend target, identified by a stable id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendTarget {
    /// Stable target id referenced by routing rules
    pub id: String,
    /// Wire protocol
    pub protocol: BackendProtocol,
    /// URL for HTTP/WebSocket targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Launch command (argv) for STDIO targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Max concurrent in-flight calls (HTTP)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Restart cap within the rolling window (STDIO)
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Rolling restart window in seconds (STDIO)
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,
    /// Grace between TERM and KILL in milliseconds (STDIO)
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_in_flight() -> usize {
    32
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window() -> u64 {
    60
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

impl BackendTarget {
    /// HTTP target with defaults
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol: BackendProtocol::Http,
            url: Some(url.into()),
            command: Vec::new(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            max_in_flight: default_max_in_flight(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }

    /// WebSocket target with defaults
    pub fn websocket(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            protocol: BackendProtocol::WebSocket,
            ..Self::http(id, url)
        }
    }

    /// STDIO target with defaults
    pub fn stdio(id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            protocol: BackendProtocol::Stdio,
            url: None,
            command,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            max_in_flight: default_max_in_flight(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate protocol-specific requirements
    pub fn validate(&self) -> BackendResult<()> {
        match self.protocol {
            BackendProtocol::Http | BackendProtocol::WebSocket => {
                if self.url.as_deref().unwrap_or("").is_empty() {
                    return Err(BackendError::Configuration(format!(
                        "target {} requires a url",
                        self.id
                    )));
                }
            }
            BackendProtocol::Stdio => {
                if self.command.is_empty() {
                    return Err(BackendError::Configuration(format!(
                        "target {} requires a launch command",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_per_protocol() {
        assert!(BackendTarget::http("a", "http://localhost:9000").validate().is_ok());
        assert!(
            BackendTarget::stdio("b", vec!["mcp-server".to_string()])
                .validate()
                .is_ok()
        );

        let mut bad = BackendTarget::http("c", "");
        bad.url = None;
        assert!(bad.validate().is_err());
        assert!(BackendTarget::stdio("d", vec![]).validate().is_err());
    }

    #[test]
    fn toml_defaults_fill_in() {
        let target: BackendTarget = serde_json::from_value(serde_json::json!({
            "id": "tools",
            "protocol": "http",
            "url": "http://localhost:9000/rpc",
        }))
        .unwrap();
        assert_eq!(target.timeout_ms, 30_000);
        assert_eq!(target.max_restarts, 3);
    }
}
