//! Request envelope and inspectable content
//!
//! A [`RequestEnvelope`] is the parsed, protocol-neutral form of one client
//! message. It is immutable after parse; pipeline stages that need a variant
//! (new direction, rewritten params) build a new envelope through the `with_*`
//! methods. The [`Content`] is the unit plugins operate on; a plugin that
//! modifies content returns a fresh `Content` and the dispatcher substitutes
//! it into the exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Pipeline direction of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to gateway
    Inbound,
    /// After routing, before the backend call
    PreTool,
    /// After the backend call
    PostTool,
    /// Gateway to client
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Inbound => "inbound",
            Self::PreTool => "pre_tool",
            Self::PostTool => "post_tool",
            Self::Outbound => "outbound",
        };
        f.write_str(tag)
    }
}

/// Client-facing transport a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// JSON-RPC over HTTP POST
    Http,
    /// Server-Sent Events with a paired POST channel
    Sse,
    /// Full-duplex WebSocket
    WebSocket,
    /// Streamable MCP (POST-opened stream)
    StreamableMcp,
    /// Line-delimited JSON on stdin/stdout
    Stdio,
}

impl TransportKind {
    /// Stable tag used in routes, metrics, and status documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
            Self::WebSocket => "ws",
            Self::StreamableMcp => "mcp",
            Self::Stdio => "stdio",
        }
    }

    /// Whether the transport keeps a server-to-client stream open
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Sse | Self::WebSocket | Self::StreamableMcp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of one client message
///
/// Owned by the dispatcher for the duration of one exchange. Fields are
/// private; transformations yield a new envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    request_id: String,
    method: String,
    params: Value,
    transport: TransportKind,
    direction: Direction,
}

impl RequestEnvelope {
    /// Create an envelope; notifications carry an empty request id
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        params: Value,
        transport: TransportKind,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            params,
            transport,
            direction: Direction::Inbound,
        }
    }

    /// Request id, unique within a session; empty for notifications
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parameter tree
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Transport the message arrived on
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Current pipeline direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether this is a notification (no reply will be produced)
    pub fn is_notification(&self) -> bool {
        self.request_id.is_empty()
    }

    /// A copy of this envelope at a different pipeline direction
    pub fn with_direction(&self, direction: Direction) -> Self {
        Self {
            direction,
            ..self.clone()
        }
    }

    /// A copy of this envelope with rewritten params
    pub fn with_params(&self, params: Value) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }
}

/// Case-insensitive header map
///
/// Keys are folded to lowercase on insert and lookup; the original casing is
/// not preserved (nothing downstream needs it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    /// Empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, folding the name to lowercase
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by case-insensitive name
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(&name.as_ref().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (lowercased name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<S: Into<String>, V: Into<String>> FromIterator<(S, V)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name.into(), value);
        }
        map
    }
}

/// Content-type tag plugins use to self-filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Structured JSON payload
    Json,
    /// Plain text payload
    Text,
    /// Opaque binary payload (base64 on the wire)
    Binary,
}

/// The payload subject to plugin inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    raw: String,
    structured: Option<Value>,
    headers: HeaderMap,
    params: HashMap<String, Value>,
    content_type: ContentType,
}

impl Content {
    /// Content from a structured JSON value; `raw` is its compact encoding
    pub fn json(value: Value) -> Self {
        let raw = value.to_string();
        Self {
            raw,
            structured: Some(value),
            headers: HeaderMap::new(),
            params: HashMap::new(),
            content_type: ContentType::Json,
        }
    }

    /// Content from plain text
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            structured: None,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            content_type: ContentType::Text,
        }
    }

    /// Raw text plugins match against
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Structured parse, when the payload is JSON
    pub fn structured(&self) -> Option<&Value> {
        self.structured.as_ref()
    }

    /// Case-insensitive headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Parameter mapping
    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    /// Content-type tag
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Attach headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a named parameter
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// A modified copy with replaced raw text
    ///
    /// Used by redacting plugins. The structured parse is refreshed when the
    /// original content was JSON and the new text still parses; otherwise it
    /// is dropped rather than left stale.
    pub fn with_raw(&self, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let structured = match self.content_type {
            ContentType::Json => serde_json::from_str(&raw).ok(),
            _ => None,
        };
        Self {
            raw,
            structured,
            headers: self.headers.clone(),
            params: self.params.clone(),
            content_type: self.content_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_transforms_yield_new_values() {
        let env = RequestEnvelope::new("a", "tools/list", json!({}), TransportKind::Http);
        assert_eq!(env.direction(), Direction::Inbound);

        let out = env.with_direction(Direction::Outbound);
        assert_eq!(env.direction(), Direction::Inbound);
        assert_eq!(out.direction(), Direction::Outbound);
        assert_eq!(out.request_id(), "a");
    }

    #[test]
    fn notification_has_empty_id() {
        let env = RequestEnvelope::new("", "notifications/initialized", json!({}), TransportKind::Stdio);
        assert!(env.is_notification());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Session-ID", "abc");
        assert_eq!(headers.get("x-session-id"), Some("abc"));
        assert_eq!(headers.get("X-SESSION-ID"), Some("abc"));
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn with_raw_refreshes_structured_parse() {
        let content = Content::json(json!({"text": "hello"}));
        let redacted = content.with_raw(r#"{"text":"[REDACTED:email]"}"#);
        assert_eq!(
            redacted.structured().unwrap()["text"],
            json!("[REDACTED:email]")
        );

        let broken = content.with_raw("not json");
        assert!(broken.structured().is_none());
    }
}
