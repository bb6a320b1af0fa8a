//! Client-facing transport endpoints
//!
//! All endpoints share a shape: negotiate content, authenticate through the
//! auth seam, open or adopt a session, and hand frames to the dispatcher.
//! They differ in framing and reply fan-out.

pub mod control;
pub mod mcp;
pub mod rpc;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::trace::TraceLayer;

use mcpgate_protocol::{HeaderMap, TransportKind};
use mcpgate_session::Session;

use crate::auth::Identity;
use crate::error::{ServerError, ServerResult};
use crate::server::GatewayContext;

/// Router over all gateway endpoints
pub fn router(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/rpc", post(rpc::handle))
        .route("/sse", get(sse::stream))
        .route("/sse/events", post(sse::send))
        .route("/sse/broadcast", post(sse::broadcast))
        .route("/sse/replay/{session}", get(sse::replay))
        .route("/ws", get(ws::upgrade))
        .route("/mcp", get(mcp::capabilities).post(mcp::open))
        .route("/mcp/capabilities", get(mcp::capabilities))
        .route("/health", get(control::health))
        .route("/{transport}/status", get(control::transport_status))
        .route("/{transport}/health", get(control::transport_health))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Convert axum headers into the protocol's case-insensitive map
pub(crate) fn protocol_headers(headers: &axum::http::HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Whether the request's `Accept` admits the given media type
pub(crate) fn accepts(headers: &axum::http::HeaderMap, media_type: &str) -> bool {
    match headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(accept) => accept
            .split(',')
            .map(|part| part.split(';').next().unwrap_or("").trim())
            .any(|part| {
                part == media_type
                    || part == "*/*"
                    || (part == "application/*" && media_type.starts_with("application/"))
            }),
    }
}

/// Authenticate a request and check the tenant is active
pub(crate) async fn authenticate(
    ctx: &GatewayContext,
    headers: &HeaderMap,
) -> ServerResult<Identity> {
    let identity = ctx.auth.authenticate(headers).await?;
    if !ctx.config.tenant_active(&identity.tenant_id) {
        return Err(ServerError::TenantUnavailable(identity.tenant_id));
    }
    Ok(identity)
}

/// Adopt the session named by `X-Session-ID` when it is live and belongs to
/// this tenant; otherwise open a new one
pub(crate) fn adopt_or_open(
    ctx: &GatewayContext,
    headers: &HeaderMap,
    identity: &Identity,
    transport: TransportKind,
) -> ServerResult<Arc<Session>> {
    if let Some(id) = headers.get("x-session-id")
        && let Ok(session) = ctx.sessions.lookup(id)
        && session.tenant_id() == identity.tenant_id
        && session.touch().is_ok()
    {
        return Ok(session);
    }
    Ok(ctx
        .sessions
        .open(&identity.tenant_id, identity.user_id.clone(), transport)?)
}

/// Map a gateway error onto a plain HTTP JSON response
pub(crate) fn error_response(err: &ServerError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "error": {
            "kind": err.kind(),
            "message": err.client_message(),
        }
    });
    if let Some(data) = err.error_data() {
        body["error"]["data"] = data;
    }
    (status, axum::Json(body)).into_response()
}
