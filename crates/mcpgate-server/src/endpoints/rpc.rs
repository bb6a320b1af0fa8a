//! JSON-RPC over HTTP endpoint
//!
//! One POST is one envelope is one synchronous reply. Errors surface as
//! JSON-RPC error bodies with a 200 status (the JSON-RPC-over-HTTP
//! convention); only transport-level failures (auth, content negotiation)
//! use HTTP statuses. The request id is echoed verbatim, preserving its wire
//! type.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use mcpgate_protocol::{
    JsonRpcError, JsonRpcResponse, ProtocolError, RequestId, TransportKind, codec,
};

use crate::endpoints::{accepts, adopt_or_open, authenticate, error_response, protocol_headers};
use crate::error::ServerError;
use crate::server::GatewayContext;

/// Pull the id out of the raw body so it can be echoed with its wire type
fn wire_id(body: &[u8]) -> Option<RequestId> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("id") {
        Some(Value::String(s)) => Some(RequestId::String(s.clone())),
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

fn jsonrpc_error(err: &ServerError, id: Option<RequestId>) -> JsonRpcResponse {
    let mut rpc_error = JsonRpcError {
        code: err.jsonrpc_code(),
        message: err.client_message(),
        data: None,
    };
    if let Some(data) = err.error_data() {
        rpc_error.data = Some(data);
    }
    match id {
        Some(id) => JsonRpcResponse::error_response(rpc_error, id),
        None => JsonRpcResponse {
            jsonrpc: mcpgate_protocol::JsonRpcVersion,
            payload: mcpgate_protocol::jsonrpc::JsonRpcResponsePayload::Error { error: rpc_error },
            id: mcpgate_protocol::ResponseId::null(),
        },
    }
}

/// POST /rpc
pub async fn handle(
    State(ctx): State<Arc<GatewayContext>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if !accepts(&headers, "application/json") {
        return error_response(&ServerError::NotAcceptable(
            "this endpoint produces application/json".to_string(),
        ));
    }

    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    let id = wire_id(&body);
    let envelope = match codec::decode(&body, TransportKind::Http) {
        Ok(envelope) => envelope,
        Err(err @ ProtocolError::MalformedFrame(_)) => {
            ctx.metrics.record_error("protocol", &identity.tenant_id);
            return axum::Json(JsonRpcResponse::parse_error(Some(err.to_string())))
                .into_response();
        }
        Err(err) => {
            ctx.metrics.record_error("protocol", &identity.tenant_id);
            return axum::Json(jsonrpc_error(&ServerError::Protocol(err), id)).into_response();
        }
    };

    let session = match adopt_or_open(&ctx, &request_headers, &identity, TransportKind::Http) {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };

    let is_notification = envelope.is_notification();
    let outcome = ctx.dispatcher.dispatch(envelope, &session).await;

    let mut response = match (outcome, is_notification) {
        (Ok(_), true) => StatusCode::ACCEPTED.into_response(),
        (Ok(value), false) => {
            let id = id.unwrap_or_else(|| RequestId::from(""));
            axum::Json(JsonRpcResponse::success(value, id)).into_response()
        }
        (Err(err), _) => axum::Json(jsonrpc_error(&err, id)).into_response(),
    };
    // Clients reuse the session on later calls via this header.
    if let Ok(value) = session.id().parse() {
        response
            .headers_mut()
            .insert("x-session-id", value);
    }
    response
}
