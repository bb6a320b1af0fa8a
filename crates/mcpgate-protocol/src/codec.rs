//! Bidirectional translation between wire bytes and envelopes
//!
//! `decode` accepts one JSON-RPC frame (HTTP body, WebSocket text frame,
//! STDIO line, or SSE POST payload) and produces a [`RequestEnvelope`].
//! `encode` is deterministic: identical envelopes produce byte-identical
//! output. Numeric params ride through as untyped `serde_json::Value`
//! tokens, so integers that arrived as strings stay strings.

use serde_json::{Map, Value};

use crate::envelope::{RequestEnvelope, TransportKind};
use crate::error::{ProtocolError, ProtocolResult};
use crate::jsonrpc::JSONRPC_VERSION;

/// Methods the gateway will route
///
/// Anything outside this set (and the `notifications/` prefix) is rejected at
/// decode time with [`ProtocolError::UnsupportedMethod`].
pub const REGISTERED_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "resources/templates/list",
    "prompts/list",
    "prompts/get",
];

/// Whether a method is in the registered set
pub fn is_registered_method(method: &str) -> bool {
    REGISTERED_METHODS.contains(&method) || method.starts_with("notifications/")
}

/// Decode one wire frame into an envelope
pub fn decode(bytes: &[u8], transport: TransportKind) -> ProtocolResult<RequestEnvelope> {
    let value: Value = serde_json::from_slice(bytes)?;

    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(ProtocolError::InvalidProtocol(
                "batch requests are not supported".to_string(),
            ));
        }
        other => {
            return Err(ProtocolError::InvalidProtocol(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )));
        }
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(ProtocolError::InvalidProtocol(format!(
                "unsupported JSON-RPC version: {other}"
            )));
        }
        None => {
            return Err(ProtocolError::InvalidProtocol(
                "missing jsonrpc version field".to_string(),
            ));
        }
    }

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidProtocol("missing method field".to_string()))?
        .to_string();

    if !is_registered_method(&method) {
        return Err(ProtocolError::UnsupportedMethod(method));
    }

    // Absent id means notification; the id type from the wire is preserved
    // verbatim in its string form for correlation.
    let request_id = match obj.get("id") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(ProtocolError::InvalidProtocol(format!(
                "id must be a string or number, got {}",
                type_name(other)
            )));
        }
    };

    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    Ok(RequestEnvelope::new(request_id, method, params, transport))
}

/// Encode an envelope back into a wire frame
///
/// Field order is fixed (jsonrpc, method, params, id) so identical envelopes
/// produce byte-identical output.
pub fn encode(envelope: &RequestEnvelope) -> ProtocolResult<Vec<u8>> {
    let mut obj = Map::new();
    obj.insert(
        "jsonrpc".to_string(),
        Value::String(JSONRPC_VERSION.to_string()),
    );
    obj.insert(
        "method".to_string(),
        Value::String(envelope.method().to_string()),
    );
    if !envelope.params().is_null() {
        obj.insert("params".to_string(), envelope.params().clone());
    }
    if !envelope.is_notification() {
        obj.insert(
            "id".to_string(),
            Value::String(envelope.request_id().to_string()),
        );
    }
    Ok(serde_json::to_vec(&Value::Object(obj))?)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
