//! Streamable MCP envelope
//!
//! One POST to `/mcp` opens an exchange in one of two modes: `json` for a
//! buffered one-shot reply, `sse` for a streamed reply. The body carries a
//! nested method/path/headers/body record rather than a bare JSON-RPC frame
//! so HTTP-shaped backends can be addressed through the same envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reply mode selected by the request body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Buffered single JSON reply
    #[default]
    Json,
    /// Server-Sent Events stream
    Sse,
}

/// Body of a streamable MCP POST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamableRequest {
    /// MCP method to invoke
    pub method: String,
    /// Optional sub-path for HTTP-shaped backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Forwarded headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body / params
    #[serde(default)]
    pub body: Value,
    /// Whether to allocate a persistent session or a request-scoped one
    #[serde(default)]
    pub stateful: bool,
    /// Reply mode
    #[serde(default)]
    pub stream_mode: StreamMode,
}

/// Capabilities document served on `GET /mcp` and `/mcp/capabilities`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesDocument {
    /// Protocol revision the gateway speaks
    pub protocol_version: String,
    /// Client transports the gateway terminates
    pub transports: Vec<String>,
    /// Supported streamable reply modes
    pub stream_modes: Vec<String>,
    /// Header clients use to resume a session
    pub session_header: String,
}

impl Default for CapabilitiesDocument {
    fn default() -> Self {
        Self {
            protocol_version: "2025-06-18".to_string(),
            transports: vec![
                "http".to_string(),
                "sse".to_string(),
                "ws".to_string(),
                "mcp".to_string(),
                "stdio".to_string(),
            ],
            stream_modes: vec!["json".to_string(), "sse".to_string()],
            session_header: "X-Session-ID".to_string(),
        }
    }
}
