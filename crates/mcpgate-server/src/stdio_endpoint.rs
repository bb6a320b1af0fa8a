//! STDIO endpoint
//!
//! In this role the gateway process itself is the server: stdin carries
//! inbound line-delimited JSON-RPC, stdout carries replies. The connection
//! serves one config-selected tenant on one session, and the loop runs until
//! EOF or shutdown.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use mcpgate_protocol::{JsonRpcError, JsonRpcResponse, RequestId, TransportKind, codec};

use crate::error::{ServerError, ServerResult};
use crate::server::GatewayContext;

/// Serve line-delimited JSON-RPC on this process's stdio for one tenant
pub async fn run(ctx: Arc<GatewayContext>, tenant_id: &str) -> ServerResult<()> {
    let session = ctx
        .sessions
        .open(tenant_id, None, TransportKind::Stdio)?;
    info!(tenant_id = %tenant_id, session_id = %session.id(), "stdio endpoint serving");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = BufWriter::new(tokio::io::stdout());
    let mut lines = stdin.lines();
    let cancel = session.cancellation_token();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => break,
        };
        let Some(line) = line else { break }; // EOF
        if line.trim().is_empty() {
            continue;
        }

        let reply = match codec::decode(line.as_bytes(), TransportKind::Stdio) {
            Ok(envelope) => {
                let request_id = RequestId::from(envelope.request_id());
                let is_notification = envelope.is_notification();
                match ctx.dispatcher.dispatch(envelope, &session).await {
                    Ok(_) if is_notification => continue,
                    Ok(value) => JsonRpcResponse::success(value, request_id),
                    Err(err) => JsonRpcResponse::error_response(
                        JsonRpcError {
                            code: err.jsonrpc_code(),
                            message: err.client_message(),
                            data: err.error_data(),
                        },
                        request_id,
                    ),
                }
            }
            Err(err) => {
                debug!(error = %err, "undecodable stdio line");
                JsonRpcResponse::parse_error(Some(err.to_string()))
            }
        };

        let text = serde_json::to_string(&reply).map_err(ServerError::Serialization)?;
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    if let Err(err) = ctx.sessions.close(session.id()) {
        warn!(error = %err, "failed to close stdio session");
    }
    info!("stdio endpoint stopped");
    Ok(())
}
