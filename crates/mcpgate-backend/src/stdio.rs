//! Supervised STDIO backend
//!
//! The backend is a child process speaking line-delimited JSON-RPC on
//! stdin/stdout, with stderr drained to the gateway's logs. Lifecycle:
//! `Launch → Ready (first successful handshake) → Serving → Draining →
//! Exited`. The supervisor relaunches after abnormal exits up to
//! `max_restarts` within a rolling window; past the cap the target goes
//! unhealthy and calls short-circuit. A per-call timeout TERMs the child and
//! KILLs it after the grace period.
//!
//! Lock layout: `parking_lot` for state and restart history (never held
//! across an await), tokio mutexes for the child handle and stdin channel
//! (held across awaits by necessity).

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex as StdMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BackendError, BackendResult};
use crate::health::{HealthThresholds, HealthTracker};
use crate::target::BackendTarget;

/// Child process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not running
    Exited,
    /// Spawned, handshake outstanding
    Launch,
    /// Handshake succeeded
    Ready,
    /// Serving calls
    Serving,
    /// Shutting down deliberately
    Draining,
}

type PendingMap = Arc<DashMap<String, oneshot::Sender<Value>>>;

/// Supervisor for one STDIO target
pub struct StdioSupervisor {
    target: BackendTarget,
    health: Arc<HealthTracker>,
    state: Arc<StdMutex<ProcessState>>,
    child: Arc<TokioMutex<Option<Child>>>,
    stdin_tx: Arc<TokioMutex<Option<mpsc::Sender<String>>>>,
    pending: PendingMap,
    restarts: StdMutex<VecDeque<Instant>>,
    launch_lock: TokioMutex<()>,
}

impl std::fmt::Debug for StdioSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioSupervisor")
            .field("target", &self.target.id)
            .field("state", &self.state())
            .field("health", &self.health.state())
            .finish()
    }
}

impl StdioSupervisor {
    /// Build a supervisor; the child launches lazily on first use
    pub fn new(target: BackendTarget) -> BackendResult<Self> {
        target.validate()?;
        let health = Arc::new(HealthTracker::new(
            target.id.clone(),
            HealthThresholds::default(),
        ));
        Ok(Self {
            target,
            health,
            state: Arc::new(StdMutex::new(ProcessState::Exited)),
            child: Arc::new(TokioMutex::new(None)),
            stdin_tx: Arc::new(TokioMutex::new(None)),
            pending: Arc::new(DashMap::new()),
            restarts: StdMutex::new(VecDeque::new()),
            launch_lock: TokioMutex::new(()),
        })
    }

    /// Health tracker for this target
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn set_state(&self, next: ProcessState) {
        *self.state.lock() = next;
    }

    /// Record a (re)launch and enforce the rolling restart cap
    fn admit_launch(&self) -> BackendResult<()> {
        let window = Duration::from_secs(self.target.restart_window_secs);
        let mut restarts = self.restarts.lock();
        let now = Instant::now();
        while let Some(&front) = restarts.front() {
            if now.duration_since(front) > window {
                restarts.pop_front();
            } else {
                break;
            }
        }
        if restarts.len() > self.target.max_restarts as usize {
            drop(restarts);
            self.health.mark_unhealthy();
            return Err(BackendError::unavailable(
                &self.target.id,
                format!(
                    "restart cap reached ({} within {:?})",
                    self.target.max_restarts, window
                ),
            ));
        }
        restarts.push_back(now);
        Ok(())
    }

    async fn launch(&self) -> BackendResult<()> {
        self.admit_launch()?;
        self.set_state(ProcessState::Launch);

        let program = &self.target.command[0];
        let args = &self.target.command[1..];
        info!(target_id = %self.target.id, command = %program, "launching stdio backend");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.set_state(ProcessState::Exited);
                self.health.record_failure();
                BackendError::Connection(format!("spawn failed: {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Connection("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Connection("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Connection("no stderr handle".to_string()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);

        // Writer: one line per message, flushed.
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
            debug!("stdio writer task finished");
        });

        // Reader: route replies to pending calls by correlation id.
        let pending = Arc::clone(&self.pending);
        let target_id = self.target.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    warn!(target_id = %target_id, "unparseable line from stdio backend");
                    continue;
                };
                let Some(correlation) = value.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if let Some((_, tx)) = pending.remove(correlation) {
                    let _ = tx.send(value);
                }
            }
            debug!(target_id = %target_id, "stdio reader task finished");
        });

        // Stderr drain.
        let target_id = self.target.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target_id = %target_id, "backend stderr: {line}");
            }
        });

        *self.child.lock().await = Some(child);
        *self.stdin_tx.lock().await = Some(stdin_tx);

        // Exit monitor: polls `try_wait` through the shared handle (keeping
        // the Child owned in one place), marks the process dead, and fails
        // anything in flight.
        let state = Arc::clone(&self.state);
        let child_slot = Arc::clone(&self.child);
        let stdin_slot = Arc::clone(&self.stdin_tx);
        let pending = Arc::clone(&self.pending);
        let target_id = self.target.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut guard = child_slot.lock().await;
                let Some(child) = guard.as_mut() else { break };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let draining = *state.lock() == ProcessState::Draining;
                        if draining {
                            debug!(target_id = %target_id, %status, "stdio backend drained");
                        } else {
                            warn!(target_id = %target_id, %status, "stdio backend exited");
                        }
                        *guard = None;
                        drop(guard);
                        *state.lock() = ProcessState::Exited;
                        *stdin_slot.lock().await = None;
                        pending.clear();
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(target_id = %target_id, error = %e, "failed to poll stdio backend");
                        break;
                    }
                }
            }
        });

        // Handshake: the first round trip moves Launch -> Ready -> Serving.
        self.set_state(ProcessState::Ready);
        match self.handshake().await {
            Ok(()) => {
                self.set_state(ProcessState::Serving);
                self.health.record_success();
                info!(target_id = %self.target.id, "stdio backend serving");
                Ok(())
            }
            Err(err) => {
                warn!(target_id = %self.target.id, error = %err, "handshake failed");
                self.health.record_failure();
                self.terminate().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> BackendResult<()> {
        let payload =
            serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": Uuid::new_v4().to_string()});
        let deadline = Instant::now() + self.target.timeout();
        self.send_and_wait(payload, deadline, &CancellationToken::new())
            .await
            .map(|_| ())
    }

    async fn send_and_wait(
        &self,
        payload: Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BackendResult<Value> {
        let correlation = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Protocol("payload missing id".to_string()))?
            .to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation.clone(), tx);

        let sender = {
            let guard = self.stdin_tx.lock().await;
            guard.clone().ok_or_else(|| {
                BackendError::unavailable(&self.target.id, "process not running")
            })?
        };
        let line =
            serde_json::to_string(&payload).map_err(|e| BackendError::Protocol(e.to_string()))?;
        sender.send(line).await.map_err(|_| {
            self.pending.remove(&correlation);
            BackendError::unavailable(&self.target.id, "process exited")
        })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = tokio::select! {
            reply = rx => reply.map_err(|_| {
                BackendError::unavailable(&self.target.id, "process exited mid-request")
            }),
            _ = tokio::time::sleep(remaining) => {
                // The per-call timeout kills the child; the supervisor will
                // relaunch within the restart budget.
                self.terminate().await;
                Err(BackendError::Timeout {
                    target: self.target.id.clone(),
                    elapsed_ms: self.target.timeout_ms,
                })
            }
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        };
        self.pending.remove(&correlation);
        outcome
    }

    async fn ensure_running(&self) -> BackendResult<()> {
        if self.state() == ProcessState::Serving {
            return Ok(());
        }
        if !self.health.is_available() {
            return Err(BackendError::unavailable(
                &self.target.id,
                self.health.state().as_str(),
            ));
        }
        let _guard = self.launch_lock.lock().await;
        // Another caller may have launched while we waited.
        if self.state() == ProcessState::Serving {
            return Ok(());
        }
        self.launch().await
    }

    /// Invoke the backend with a JSON-RPC payload
    pub async fn invoke(
        &self,
        mut payload: Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BackendResult<Value> {
        self.ensure_running().await?;

        let original_id = payload.get("id").cloned();
        let correlation = Uuid::new_v4().to_string();
        payload["id"] = Value::String(correlation);

        let outcome = self.send_and_wait(payload, deadline, cancel).await;
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

    /// TERM the child, then KILL after the grace period
    async fn terminate(&self) {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            self.set_state(ProcessState::Exited);
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: plain signal delivery to a child we spawned.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let grace = Duration::from_millis(self.target.kill_grace_ms);
        let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
        if !exited {
            warn!(target_id = %self.target.id, "grace expired, killing stdio backend");
            let _ = child.kill().await;
        }
        *guard = None;
        drop(guard);
        *self.stdin_tx.lock().await = None;
        self.pending.clear();
        self.set_state(ProcessState::Exited);
    }

    /// Drain and stop the child (gateway shutdown)
    pub async fn shutdown(&self) {
        self.set_state(ProcessState::Draining);
        // Closing stdin tells well-behaved servers to exit.
        *self.stdin_tx.lock().await = None;
        self.terminate().await;
        info!(target_id = %self.target.id, "stdio backend stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target(command: &[&str], max_restarts: u32) -> BackendTarget {
        let mut target =
            BackendTarget::stdio("tools", command.iter().map(|s| s.to_string()).collect());
        target.timeout_ms = 2_000;
        target.max_restarts = max_restarts;
        target.kill_grace_ms = 200;
        target
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    // `cat` echoes each line back, which resolves the correlation id exactly
    // like a real server's reply would.
    #[tokio::test]
    async fn echo_backend_round_trip() {
        let supervisor = StdioSupervisor::new(target(&["cat"], 3)).unwrap();
        let reply = supervisor
            .invoke(
                json!({"jsonrpc": "2.0", "method": "tools/list", "id": "c1"}),
                deadline(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["method"], json!("tools/list"));
        assert_eq!(reply["id"], json!("c1"));
        assert_eq!(supervisor.state(), ProcessState::Serving);
        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), ProcessState::Exited);
    }

    #[tokio::test]
    async fn crashing_backend_fails_then_restart_cap_trips() {
        // `false` exits immediately; every launch fails its handshake.
        let supervisor = StdioSupervisor::new(target(&["false"], 1)).unwrap();
        let payload = json!({"jsonrpc": "2.0", "method": "ping", "id": "x"});

        let first = supervisor
            .invoke(payload.clone(), deadline(), &CancellationToken::new())
            .await;
        assert!(first.is_err());

        // Keep invoking until the rolling-window cap marks it unhealthy.
        for _ in 0..3 {
            let _ = supervisor
                .invoke(payload.clone(), deadline(), &CancellationToken::new())
                .await;
        }
        assert!(!supervisor.health().is_available());
        let err = supervisor
            .invoke(payload, deadline(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn recovers_within_restart_budget() {
        let supervisor = StdioSupervisor::new(target(&["cat"], 3)).unwrap();
        let first = supervisor
            .invoke(
                json!({"jsonrpc": "2.0", "method": "ping", "id": "1"}),
                deadline(),
                &CancellationToken::new(),
            )
            .await;
        assert!(first.is_ok());

        // Simulate an abnormal exit, then verify the next call relaunches.
        supervisor.terminate().await;
        assert_eq!(supervisor.state(), ProcessState::Exited);

        let second = supervisor
            .invoke(
                json!({"jsonrpc": "2.0", "method": "ping", "id": "2"}),
                deadline(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(second["id"], json!("2"));
        supervisor.shutdown().await;
    }
}
