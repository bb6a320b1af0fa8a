//! Server-Sent Events endpoints
//!
//! The long GET at `/sse` carries server-to-client frames only; clients send
//! through the paired POST at `/sse/events` with their session id header.
//! Reconnects name the session in the query string and resume from the
//! `Last-Event-Id` cursor; a cursor that has fallen off the replay ring is a
//! `410`, and the client must re-initialize. Keep-alives are `event: ping`
//! frames every 30 seconds.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use mcpgate_protocol::{JsonRpcError, JsonRpcResponse, RequestId, TransportKind, codec};
use mcpgate_session::{SessionFilter, StoredFrame};

use crate::endpoints::{authenticate, error_response, protocol_headers};
use crate::error::ServerError;
use crate::server::GatewayContext;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Query parameters for the stream and replay endpoints
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Session to resume; absent opens a new session
    pub session: Option<String>,
    /// Resume cursor; `Last-Event-Id` header takes precedence
    pub last_event_id: Option<u64>,
}

fn resume_cursor(headers: &axum::http::HeaderMap, params: &StreamParams) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or(params.last_event_id)
}

fn sse_event(frame: &StoredFrame) -> Event {
    let mut event = Event::default().id(frame.id.to_string()).data(&frame.data);
    if frame.event != "message" {
        event = event.event(&frame.event);
    }
    event
}

/// GET /sse
pub async fn stream(
    State(ctx): State<Arc<GatewayContext>>,
    Query(params): Query<StreamParams>,
    headers: axum::http::HeaderMap,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    // Reconnects name their session in the query string.
    let session = if let Some(id) = &params.session {
        match ctx.sessions.lookup(id) {
            Ok(session) if session.tenant_id() == identity.tenant_id => session,
            Ok(_) => {
                return error_response(&ServerError::Authentication(
                    "session belongs to another tenant".to_string(),
                ));
            }
            Err(err) => return error_response(&ServerError::Session(err)),
        }
    } else {
        match ctx
            .sessions
            .open(&identity.tenant_id, identity.user_id.clone(), TransportKind::Sse)
        {
            Ok(session) => session,
            Err(err) => return error_response(&ServerError::Session(err)),
        }
    };
    if let Err(err) = session.touch() {
        return error_response(&ServerError::Session(err));
    }

    // Replay before subscribing so no frame is lost in between; a discarded
    // cursor fails the whole request.
    let replayed = match resume_cursor(&headers, &params) {
        Some(cursor) => match session.replay(cursor) {
            Ok(frames) => frames,
            Err(err) => return error_response(&ServerError::Session(err)),
        },
        None => Vec::new(),
    };
    let mut live = session.subscribe();
    let cancel = session.cancellation_token();
    let session_id = session.id().to_string();
    debug!(session_id = %session_id, replayed = replayed.len(), "sse stream open");

    let stream: std::pin::Pin<
        Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>,
    > = Box::pin(async_stream::stream! {
        yield Ok(Event::default()
            .event("session")
            .data(json!({"session_id": session_id}).to_string()));

        for frame in replayed {
            yield Ok(sse_event(&frame));
        }

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                frame = live.recv() => match frame {
                    Some(frame) => yield Ok(sse_event(&frame)),
                    None => break,
                },
                _ = ping.tick() => {
                    yield Ok(Event::default().event("ping").data(""));
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    Sse::new(stream).into_response()
}

/// POST /sse/events
///
/// The client-to-server half of the SSE transport. The reply rides the
/// stream; the POST acknowledges with the assigned event id.
pub async fn send(
    State(ctx): State<Arc<GatewayContext>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    let Some(session_id) = request_headers.get("x-session-id") else {
        return error_response(&ServerError::Authentication(
            "X-Session-ID header required".to_string(),
        ));
    };
    let session = match ctx.sessions.lookup(session_id) {
        Ok(session) if session.tenant_id() == identity.tenant_id => session,
        Ok(_) => {
            return error_response(&ServerError::Authentication(
                "session belongs to another tenant".to_string(),
            ));
        }
        Err(err) => return error_response(&ServerError::Session(err)),
    };

    let envelope = match codec::decode(&body, TransportKind::Sse) {
        Ok(envelope) => envelope,
        Err(err) => return error_response(&ServerError::Protocol(err)),
    };
    let request_id = RequestId::from(envelope.request_id());
    let is_notification = envelope.is_notification();

    let outcome = ctx.dispatcher.dispatch(envelope, &session).await;
    let reply = match outcome {
        Ok(value) => {
            if is_notification {
                return (StatusCode::ACCEPTED, axum::Json(json!({"status": "accepted"})))
                    .into_response();
            }
            JsonRpcResponse::success(value, request_id)
        }
        Err(err) => {
            let rpc_error = JsonRpcError {
                code: err.jsonrpc_code(),
                message: err.client_message(),
                data: err.error_data(),
            };
            JsonRpcResponse::error_response(rpc_error, request_id)
        }
    };

    let data = match serde_json::to_string(&reply) {
        Ok(data) => data,
        Err(err) => return error_response(&ServerError::Serialization(err)),
    };
    let event = if reply.is_success() { "message" } else { "error" };
    match session.push_frame(event, data) {
        Ok(frame) => (
            StatusCode::ACCEPTED,
            axum::Json(json!({"status": "accepted", "event_id": frame.id})),
        )
            .into_response(),
        Err(err) => error_response(&ServerError::Session(err)),
    }
}

/// POST /sse/broadcast
///
/// Pushes one frame to every SSE session of the caller's tenant.
pub async fn broadcast(
    State(ctx): State<Arc<GatewayContext>>,
    headers: axum::http::HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    let sessions = ctx.sessions.enumerate(&SessionFilter {
        tenant_id: Some(identity.tenant_id.clone()),
        transport: Some(TransportKind::Sse),
    });

    // Broadcast frames bypass the unary pipeline, so the outbound chain runs
    // here per receiving session. A block ends that session's stream with a
    // final error frame.
    let envelope = mcpgate_protocol::RequestEnvelope::new(
        "",
        "notifications/message",
        serde_json::Value::Null,
        TransportKind::Sse,
    );
    let mut delivered = 0usize;
    let mut blocked = 0usize;
    for session in sessions {
        match ctx
            .dispatcher
            .check_outbound_frame(&envelope, &session, body.clone())
            .await
        {
            Ok(frame) => {
                if session.push_frame("broadcast", frame.to_string()).is_ok() {
                    delivered += 1;
                }
            }
            Err(err) => {
                blocked += 1;
                let data = json!({"error": {"kind": err.kind(), "message": err.client_message()}});
                let _ = session.push_frame("error", data.to_string());
                let _ = ctx.sessions.close(session.id());
            }
        }
    }
    axum::Json(json!({"delivered": delivered, "blocked": blocked})).into_response()
}

/// GET /sse/replay/{session}
pub async fn replay(
    State(ctx): State<Arc<GatewayContext>>,
    Path(session_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: axum::http::HeaderMap,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    let session = match ctx.sessions.lookup(&session_id) {
        Ok(session) if session.tenant_id() == identity.tenant_id => session,
        Ok(_) => {
            return error_response(&ServerError::Authentication(
                "session belongs to another tenant".to_string(),
            ));
        }
        Err(err) => return error_response(&ServerError::Session(err)),
    };

    let cursor = resume_cursor(&headers, &params).unwrap_or(0);
    match session.replay(cursor) {
        Ok(frames) => {
            let frames: Vec<Value> = frames
                .iter()
                .map(|f| json!({"id": f.id, "event": f.event, "data": f.data}))
                .collect();
            axum::Json(json!({"frames": frames})).into_response()
        }
        Err(err) => error_response(&ServerError::Session(err)),
    }
}
