//! Streamable MCP endpoint
//!
//! `GET /mcp` negotiates capabilities; `POST /mcp` opens one exchange whose
//! body selects the reply mode (`json` one-shot or `sse` stream) and whether
//! the session persists past the request. A session header accompanying a
//! stateless request is adopted when it resolves to a live session of the
//! same tenant; otherwise the request gets a scoped session that closes at
//! the end of the exchange.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use mcpgate_protocol::{
    CapabilitiesDocument, RequestEnvelope, StreamMode, StreamableRequest, TransportKind, codec,
};

use crate::endpoints::{accepts, adopt_or_open, authenticate, error_response, protocol_headers};
use crate::error::ServerError;
use crate::server::GatewayContext;

/// GET /mcp and GET /mcp/capabilities
pub async fn capabilities(State(_ctx): State<Arc<GatewayContext>>) -> Response {
    axum::Json(CapabilitiesDocument::default()).into_response()
}

/// POST /mcp
pub async fn open(
    State(ctx): State<Arc<GatewayContext>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    let request: StreamableRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&ServerError::Protocol(
                mcpgate_protocol::ProtocolError::MalformedFrame(err.to_string()),
            ));
        }
    };

    match request.stream_mode {
        StreamMode::Json => {
            if !accepts(&headers, "application/json") {
                return error_response(&ServerError::NotAcceptable(
                    "json stream mode produces application/json".to_string(),
                ));
            }
        }
        StreamMode::Sse => {
            if !accepts(&headers, "text/event-stream") {
                return error_response(&ServerError::NotAcceptable(
                    "sse stream mode produces text/event-stream".to_string(),
                ));
            }
        }
    }

    // Stateful requests keep their session; stateless ones get a scoped
    // session unless the header resolves to a live one worth adopting.
    let session = match adopt_or_open(
        &ctx,
        &request_headers,
        &identity,
        TransportKind::StreamableMcp,
    ) {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };
    let scoped = !request.stateful && request_headers.get("x-session-id").is_none();

    let request_id = Uuid::new_v4().to_string();
    let envelope = RequestEnvelope::new(
        request_id.clone(),
        request.method.clone(),
        request.body.clone(),
        TransportKind::StreamableMcp,
    );
    if !codec::is_registered_method(envelope.method()) {
        return error_response(&ServerError::Protocol(
            mcpgate_protocol::ProtocolError::UnsupportedMethod(request.method),
        ));
    }
    debug!(session_id = %session.id(), method = %envelope.method(), mode = ?request.stream_mode,
           stateful = request.stateful, "streamable exchange open");

    let outcome = ctx.dispatcher.dispatch(envelope, &session).await;

    let response = match request.stream_mode {
        StreamMode::Json => match outcome {
            Ok(value) => {
                let mut response = axum::Json(json!({
                    "jsonrpc": "2.0",
                    "result": value,
                    "id": request_id,
                }))
                .into_response();
                if let Ok(header) = session.id().parse() {
                    response.headers_mut().insert("x-session-id", header);
                }
                response
            }
            Err(err) => error_response(&err),
        },
        StreamMode::Sse => stream_response(&ctx, &session, &request_id, outcome, scoped),
    };

    if scoped && request.stream_mode == StreamMode::Json {
        let _ = ctx.sessions.close(session.id());
    }
    response
}

/// Build the SSE reply stream: the exchange result first, then, for
/// persistent sessions, the live frame feed
///
/// An errored exchange emits a single final `error` frame and closes the
/// session, whatever its statefulness.
fn stream_response(
    ctx: &Arc<GatewayContext>,
    session: &Arc<mcpgate_session::Session>,
    request_id: &str,
    outcome: Result<serde_json::Value, ServerError>,
    scoped: bool,
) -> Response {
    type EventStream =
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<Event, std::convert::Infallible>> + Send>>;

    let sessions = Arc::clone(&ctx.sessions);
    let session_id = session.id().to_string();

    let first = match outcome {
        Ok(value) => {
            let data = json!({"jsonrpc": "2.0", "result": value, "id": request_id}).to_string();
            match session.push_frame("message", data) {
                Ok(frame) => Event::default()
                    .id(frame.id.to_string())
                    .data(&frame.data),
                Err(err) => return error_response(&ServerError::Session(err)),
            }
        }
        Err(err) => {
            // A failed exchange ends the stream: one error frame, then close.
            let data = json!({
                "jsonrpc": "2.0",
                "error": {"code": err.jsonrpc_code(), "message": err.client_message()},
                "id": request_id,
            })
            .to_string();
            let event = Event::default().event("error").data(data);
            let stream: EventStream = Box::pin(async_stream::stream! {
                yield Ok(event);
                let _ = sessions.close(&session_id);
            });
            return Sse::new(stream).into_response();
        }
    };

    let mut live = session.subscribe();
    let cancel = session.cancellation_token();
    let first_id = session.last_event_id();

    let stream: EventStream = Box::pin(async_stream::stream! {
        yield Ok(first);
        if scoped {
            let _ = sessions.close(&session_id);
            return;
        }
        let mut ping = tokio::time::interval(std::time::Duration::from_secs(30));
        ping.tick().await;
        loop {
            tokio::select! {
                frame = live.recv() => match frame {
                    // The first frame was already emitted above.
                    Some(frame) if frame.id > first_id => {
                        let mut event = Event::default().id(frame.id.to_string()).data(&frame.data);
                        if frame.event != "message" {
                            event = event.event(&frame.event);
                        }
                        yield Ok(event);
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = ping.tick() => yield Ok(Event::default().event("ping").data("")),
                _ = cancel.cancelled() => break,
            }
        }
    });

    Sse::new(stream).into_response()
}
