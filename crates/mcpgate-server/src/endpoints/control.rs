//! Health and status endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use mcpgate_protocol::TransportKind;

use crate::server::GatewayContext;

fn transport_from_tag(tag: &str) -> Option<TransportKind> {
    match tag {
        "http" => Some(TransportKind::Http),
        "sse" => Some(TransportKind::Sse),
        "ws" => Some(TransportKind::WebSocket),
        "mcp" => Some(TransportKind::StreamableMcp),
        "stdio" => Some(TransportKind::Stdio),
        _ => None,
    }
}

/// GET /health
pub async fn health(State(ctx): State<Arc<GatewayContext>>) -> Response {
    let backends: Vec<_> = ctx.backends.statuses();
    let degraded = backends
        .iter()
        .any(|status| status.health == mcpgate_backend::HealthState::Unhealthy);
    let body = json!({
        "status": if degraded { "degraded" } else { "ok" },
        "sessions": ctx.sessions.active_count(),
        "health_transitions": ctx.backends.total_health_transitions(),
        "backends": backends,
    });
    axum::Json(body).into_response()
}

/// GET /{transport}/status
pub async fn transport_status(
    State(ctx): State<Arc<GatewayContext>>,
    Path(transport): Path<String>,
) -> Response {
    let Some(kind) = transport_from_tag(&transport) else {
        return (StatusCode::NOT_FOUND, axum::Json(json!({"error": "unknown transport"})))
            .into_response();
    };
    let body = json!({
        "transport": kind.as_str(),
        "sessions": ctx.sessions.count_for(kind),
        "metrics": ctx.metrics.snapshot(),
    });
    axum::Json(body).into_response()
}

/// GET /{transport}/health
pub async fn transport_health(
    State(ctx): State<Arc<GatewayContext>>,
    Path(transport): Path<String>,
) -> Response {
    let Some(kind) = transport_from_tag(&transport) else {
        return (StatusCode::NOT_FOUND, axum::Json(json!({"error": "unknown transport"})))
            .into_response();
    };
    axum::Json(json!({
        "transport": kind.as_str(),
        "status": "healthy",
    }))
    .into_response()
}
