//! Backend pool
//!
//! The one surface the dispatcher talks to: a registry of connectors keyed by
//! target id, with health gating in front of every call. Unhealthy targets
//! short-circuit without touching the network.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::health::HealthState;
use crate::http::HttpConnector;
use crate::stdio::StdioSupervisor;
use crate::target::{BackendProtocol, BackendTarget};
use crate::websocket::WebSocketConnector;

enum Connector {
    Http(HttpConnector),
    WebSocket(WebSocketConnector),
    Stdio(StdioSupervisor),
}

impl Connector {
    fn health(&self) -> HealthState {
        match self {
            Self::Http(c) => c.health().state(),
            Self::WebSocket(c) => c.health().state(),
            Self::Stdio(c) => c.health().state(),
        }
    }

    fn transition_count(&self) -> u64 {
        match self {
            Self::Http(c) => c.health().transition_count(),
            Self::WebSocket(c) => c.health().transition_count(),
            Self::Stdio(c) => c.health().transition_count(),
        }
    }

    fn is_available(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }
}

/// Status entry for one target
#[derive(Debug, Clone, serde::Serialize)]
pub struct TargetStatus {
    /// Target id
    pub id: String,
    /// Protocol
    pub protocol: BackendProtocol,
    /// Current health
    pub health: HealthState,
}

/// Registry of backend connectors
pub struct BackendPool {
    connectors: DashMap<String, Arc<Connector>>,
    protocols: DashMap<String, BackendProtocol>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("targets", &self.connectors.len())
            .finish()
    }
}

impl BackendPool {
    /// Pool sharing one HTTP client across HTTP targets
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            connectors: DashMap::new(),
            protocols: DashMap::new(),
            http_client,
        }
    }

    /// Register a target; replaces an existing connector with the same id
    pub fn register(&self, target: BackendTarget) -> BackendResult<()> {
        target.validate()?;
        let id = target.id.clone();
        let protocol = target.protocol;
        let connector = match target.protocol {
            BackendProtocol::Http => {
                Connector::Http(HttpConnector::new(target, self.http_client.clone())?)
            }
            BackendProtocol::WebSocket => Connector::WebSocket(WebSocketConnector::new(target)?),
            BackendProtocol::Stdio => Connector::Stdio(StdioSupervisor::new(target)?),
        };
        debug!(target_id = %id, protocol = ?protocol, "backend target registered");
        self.connectors.insert(id.clone(), Arc::new(connector));
        self.protocols.insert(id, protocol);
        Ok(())
    }

    /// Invoke a target with a JSON-RPC payload
    pub async fn invoke(
        &self,
        target_id: &str,
        payload: Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BackendResult<Value> {
        let connector = self
            .connectors
            .get(target_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| BackendError::UnknownTarget(target_id.to_string()))?;

        if !connector.is_available() {
            return Err(BackendError::unavailable(
                target_id,
                connector.health().as_str(),
            ));
        }

        match connector.as_ref() {
            Connector::Http(c) => c.invoke(payload, deadline, cancel).await,
            Connector::WebSocket(c) => c.invoke(payload, deadline, cancel).await,
            Connector::Stdio(c) => c.invoke(payload, deadline, cancel).await,
        }
    }

    /// Current health of a target
    pub fn health(&self, target_id: &str) -> Option<HealthState> {
        self.connectors.get(target_id).map(|c| c.health())
    }

    /// Whether a target id is registered
    pub fn contains(&self, target_id: &str) -> bool {
        self.connectors.contains_key(target_id)
    }

    /// Status of every target
    pub fn statuses(&self) -> Vec<TargetStatus> {
        self.connectors
            .iter()
            .map(|entry| TargetStatus {
                id: entry.key().clone(),
                protocol: self
                    .protocols
                    .get(entry.key())
                    .map_or(BackendProtocol::Http, |p| *p),
                health: entry.value().health(),
            })
            .collect()
    }

    /// Total health transitions across all targets
    pub fn total_health_transitions(&self) -> u64 {
        self.connectors
            .iter()
            .map(|entry| entry.value().transition_count())
            .sum()
    }

    /// Run one health-ping pass over the HTTP targets
    ///
    /// WebSocket and STDIO targets are observed through their connection
    /// lifecycle instead of an active probe.
    pub async fn ping_once(&self) {
        let connectors: Vec<Arc<Connector>> = self
            .connectors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connector in connectors {
            if let Connector::Http(c) = connector.as_ref() {
                c.ping().await;
            }
        }
    }

    /// Spawn the periodic health-ping task; exits on shutdown
    pub fn spawn_health_pings(
        self: &Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // targets just registered; skip the immediate tick
            loop {
                tokio::select! {
                    _ = tick.tick() => pool.ping_once().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    /// Drain child processes and drop persistent connections
    pub async fn shutdown(&self) {
        for entry in self.connectors.iter() {
            match entry.value().as_ref() {
                Connector::Stdio(c) => c.shutdown().await,
                Connector::WebSocket(c) => c.disconnect().await,
                Connector::Http(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn unknown_target_errors() {
        let pool = BackendPool::new(reqwest::Client::new());
        let err = pool
            .invoke(
                "missing",
                json!({}),
                Instant::now() + Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn stdio_target_round_trip_through_pool() {
        let pool = BackendPool::new(reqwest::Client::new());
        pool.register(BackendTarget::stdio("echo", vec!["cat".to_string()]))
            .unwrap();

        let reply = pool
            .invoke(
                "echo",
                json!({"jsonrpc": "2.0", "method": "ping", "id": "p"}),
                Instant::now() + Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["id"], json!("p"));
        assert_eq!(pool.health("echo"), Some(HealthState::Healthy));
        pool.shutdown().await;
    }

    #[test]
    fn register_validates_targets() {
        let pool = BackendPool::new(reqwest::Client::new());
        assert!(pool.register(BackendTarget::stdio("bad", vec![])).is_err());
        assert!(!pool.contains("bad"));
    }
}
