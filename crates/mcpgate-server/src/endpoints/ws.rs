//! WebSocket endpoint
//!
//! Symmetric full-duplex under the `mcp.v1` subprotocol. Route resolution
//! and the pre-tool chain run once, on the first frame, and the resolved
//! route is cached for the connection; every frame after that runs the
//! inbound chain, the backend call, and the outbound chain independently. A
//! blocked frame produces an error frame and the session stays open. A
//! writer task drains the session's outbound frames; pings go out every 30
//! seconds.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use mcpgate_protocol::{JsonRpcError, JsonRpcResponse, RequestId, TransportKind, codec};
use mcpgate_session::Session;

use crate::auth::Identity;
use crate::dispatcher::StreamRoute;
use crate::endpoints::{authenticate, error_response, protocol_headers};
use crate::error::ServerError;
use crate::server::GatewayContext;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws (upgrade)
pub async fn upgrade(
    State(ctx): State<Arc<GatewayContext>>,
    ws: WebSocketUpgrade,
    headers: axum::http::HeaderMap,
) -> Response {
    let request_headers = protocol_headers(&headers);
    let identity = match authenticate(&ctx, &request_headers).await {
        Ok(identity) => identity,
        Err(err) => return error_response(&err),
    };

    ws.protocols(["mcp.v1"])
        .on_upgrade(move |socket| handle_socket(ctx, identity, socket))
        .into_response()
}

async fn handle_socket(ctx: Arc<GatewayContext>, identity: Identity, socket: WebSocket) {
    let session = match ctx.sessions.open(
        &identity.tenant_id,
        identity.user_id.clone(),
        TransportKind::WebSocket,
    ) {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "could not open websocket session");
            return;
        }
    };
    let session_id = session.id().to_string();
    debug!(session_id = %session_id, "websocket session open");

    let (mut sink, mut source) = socket.split();
    let mut outbound = session.subscribe();
    let cancel = session.cancellation_token();

    // First frame tells the client its session id.
    let hello = json!({"session_id": session_id}).to_string();
    if sink.send(Message::Text(hello.into())).await.is_err() {
        let _ = ctx.sessions.close(&session_id);
        return;
    }

    // Writer: session frames out, plus the ping cadence.
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.data.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                _ = writer_cancel.cancelled() => break,
            }
        }
    });

    // Reader: the first frame opens the stream (resolution + pre-tool, once);
    // every frame then dispatches independently against the cached route.
    let mut route: Option<StreamRoute> = None;
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&ctx, &session, &mut route, text.as_bytes()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "websocket read error");
                break;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    debug!(session_id = %session_id, "websocket session closing");
    let _ = ctx.sessions.close(&session_id);
    writer.abort();
}

/// Dispatch one inbound frame; the reply (success or error) goes out as a
/// session frame so ordering is preserved with everything else in flight
///
/// The first frame to arrive resolves the connection's route; a failed open
/// leaves `route` empty so the next frame retries, and the session stays
/// open either way.
async fn handle_frame(
    ctx: &GatewayContext,
    session: &Session,
    route: &mut Option<StreamRoute>,
    bytes: &[u8],
) {
    let envelope = match codec::decode(bytes, TransportKind::WebSocket) {
        Ok(envelope) => envelope,
        Err(err) => {
            let reply = JsonRpcResponse::parse_error(Some(err.to_string()));
            push_reply(session, &reply);
            return;
        }
    };
    let request_id = RequestId::from(envelope.request_id());
    let is_notification = envelope.is_notification();

    if route.is_none() {
        match ctx.dispatcher.open_stream(&envelope, session).await {
            Ok(opened) => *route = Some(opened),
            Err(err) => {
                push_error(session, &err, request_id);
                return;
            }
        }
    }
    let Some(stream_route) = route.as_ref() else {
        return;
    };

    match ctx
        .dispatcher
        .dispatch_frame(envelope, session, stream_route)
        .await
    {
        Ok(value) => {
            if !is_notification {
                push_reply(session, &JsonRpcResponse::success(value, request_id));
            }
        }
        Err(err) => push_error(session, &err, request_id),
    }
}

fn push_error(session: &Session, err: &ServerError, request_id: RequestId) {
    let rpc_error = JsonRpcError {
        code: err.jsonrpc_code(),
        message: err.client_message(),
        data: err.error_data(),
    };
    push_reply(session, &JsonRpcResponse::error_response(rpc_error, request_id));
}

fn push_reply(session: &Session, reply: &JsonRpcResponse) {
    let Ok(data) = serde_json::to_string(reply) else {
        return;
    };
    let event = if reply.is_success() { "message" } else { "error" };
    if let Err(err) = session.push_frame(event, data) {
        warn!(session_id = %session.id(), error = %err, "failed to queue websocket reply");
    }
}
