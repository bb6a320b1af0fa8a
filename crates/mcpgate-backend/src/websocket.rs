//! WebSocket backend connector
//!
//! One persistent connection per target. A writer task drains an outbound
//! queue; a reader task routes replies to per-call inboxes keyed by a
//! correlation id the gateway substitutes for the JSON-RPC id on the way out
//! (ids from different client sessions may collide, the correlation id never
//! does). On unexpected close there is a single reconnect attempt after a
//! 1 s backoff; a second failure marks the target unhealthy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BackendError, BackendResult};
use crate::health::{HealthThresholds, HealthTracker};
use crate::target::BackendTarget;

type PendingMap = Arc<DashMap<String, oneshot::Sender<Value>>>;

struct Connection {
    writer_tx: mpsc::Sender<String>,
    alive: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Connector for one WebSocket target
pub struct WebSocketConnector {
    target: BackendTarget,
    health: Arc<HealthTracker>,
    connection: Mutex<Option<Connection>>,
    pending: PendingMap,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("target", &self.target.id)
            .field("health", &self.health.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl WebSocketConnector {
    /// Build a connector; the connection is dialed lazily on first use
    pub fn new(target: BackendTarget) -> BackendResult<Self> {
        target.validate()?;
        let health = Arc::new(HealthTracker::new(
            target.id.clone(),
            HealthThresholds::default(),
        ));
        Ok(Self {
            target,
            health,
            connection: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
        })
    }

    /// Health tracker for this target
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    async fn dial(&self) -> BackendResult<Connection> {
        let url = self
            .target
            .url
            .as_deref()
            .ok_or_else(|| BackendError::Configuration("missing url".to_string()))?;

        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let alive = Arc::new(AtomicBool::new(true));
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);

        let writer_alive = Arc::clone(&alive);
        let writer_task = tokio::spawn(async move {
            while let Some(text) = writer_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            writer_alive.store(false, Ordering::Relaxed);
        });

        let reader_alive = Arc::clone(&alive);
        let pending = Arc::clone(&self.pending);
        let target_id = self.target.id.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            warn!(target_id = %target_id, "unparseable frame from backend");
                            continue;
                        };
                        let Some(correlation) = value.get("id").and_then(Value::as_str) else {
                            // Server-initiated notification; nothing waits on it.
                            continue;
                        };
                        if let Some((_, tx)) = pending.remove(correlation) {
                            let _ = tx.send(value);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!(target_id = %target_id, "backend websocket closed");
            reader_alive.store(false, Ordering::Relaxed);
        });

        Ok(Connection {
            writer_tx,
            alive,
            reader_task,
            writer_task,
        })
    }

    /// Get the live connection, dialing or reconnecting as needed
    ///
    /// One reconnect attempt with a 1 s backoff; a second failure marks the
    /// target unhealthy.
    async fn ensure_connected(&self) -> BackendResult<mpsc::Sender<String>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref()
            && connection.is_alive()
        {
            return Ok(connection.writer_tx.clone());
        }

        if let Some(old) = guard.take() {
            old.shutdown();
        }

        match self.dial().await {
            Ok(connection) => {
                let tx = connection.writer_tx.clone();
                *guard = Some(connection);
                self.health.record_success();
                return Ok(tx);
            }
            Err(first) => {
                warn!(target_id = %self.target.id, error = %first, "dial failed, retrying in 1s");
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        match self.dial().await {
            Ok(connection) => {
                let tx = connection.writer_tx.clone();
                *guard = Some(connection);
                self.health.record_success();
                Ok(tx)
            }
            Err(err) => {
                self.health.mark_unhealthy();
                Err(err)
            }
        }
    }

    /// Invoke the backend with a JSON-RPC payload
    pub async fn invoke(
        &self,
        mut payload: Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BackendResult<Value> {
        if !self.health.is_available() {
            return Err(BackendError::unavailable(
                &self.target.id,
                self.health.state().as_str(),
            ));
        }

        // Swap the JSON-RPC id for a process-unique correlation id; the
        // original goes back into the reply before it is returned.
        let original_id = payload.get("id").cloned();
        let correlation = Uuid::new_v4().to_string();
        payload["id"] = Value::String(correlation.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation.clone(), tx);

        let outcome = async {
            let writer = self.ensure_connected().await?;
            let text =
                serde_json::to_string(&payload).map_err(|e| BackendError::Protocol(e.to_string()))?;
            writer
                .send(text)
                .await
                .map_err(|_| BackendError::Connection("writer closed".to_string()))?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                reply = rx => reply.map_err(|_| BackendError::Connection("connection lost".to_string())),
                _ = tokio::time::sleep(remaining) => Err(BackendError::Timeout {
                    target: self.target.id.clone(),
                    elapsed_ms: self.target.timeout_ms,
                }),
                _ = cancel.cancelled() => Err(BackendError::Cancelled),
            }
        }
        .await;

        self.pending.remove(&correlation);

        match outcome {
            Ok(mut reply) => {
                self.health.record_success();
                match original_id {
                    Some(id) => reply["id"] = id,
                    None => {
                        if let Some(obj) = reply.as_object_mut() {
                            obj.remove("id");
                        }
                    }
                }
                Ok(reply)
            }
            Err(err) => {
                if !matches!(err, BackendError::Cancelled) {
                    self.health.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Drop the connection (shutdown path)
    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shutdown();
        }
    }
}
