//! Shared session registry
//!
//! A sharded concurrent map of live sessions. Lookups and touches proceed
//! without serializing against each other; open and close take the map's
//! write path for their shard only. Per-session mutation goes through the
//! session's own lock. A background reaper moves sessions idle past the
//! configured timeout to `Idle` and closes them after the grace period.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use mcpgate_protocol::TransportKind;

use crate::error::{SessionError, SessionResult};
use crate::session::{Session, SessionState};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle window after which a session is marked `Idle`
    pub session_timeout: Duration,
    /// Grace period an `Idle` session survives before being closed
    pub idle_grace: Duration,
    /// Reaper tick interval
    pub reap_interval: Duration,
    /// Replay ring capacity for streaming sessions
    pub replay_buffer_size: usize,
    /// Maximum concurrently open sessions
    pub max_sessions: usize,
    /// How long a `Closing` session may drain before the terminal transition
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(300),
            idle_grace: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
            replay_buffer_size: 256,
            max_sessions: 10_000,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Filter for [`SessionRegistry::enumerate`]
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Restrict to one tenant
    pub tenant_id: Option<String>,
    /// Restrict to one transport
    pub transport: Option<TransportKind>,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(tenant) = &self.tenant_id
            && session.tenant_id() != tenant
        {
            return false;
        }
        if let Some(transport) = self.transport
            && session.transport() != transport
        {
            return false;
        }
        true
    }
}

/// Shared registry of live sessions
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionRegistry {
    /// Create a registry; `shutdown` is the gateway-wide cancellation root
    pub fn new(config: SessionConfig, shutdown: CancellationToken) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config,
            shutdown,
        }
    }

    /// Open a session for a tenant on a transport
    ///
    /// Ids are random UUIDs and never reused across the process lifetime.
    pub fn open(
        &self,
        tenant_id: impl Into<String>,
        user_id: Option<String>,
        transport: TransportKind,
    ) -> SessionResult<Arc<Session>> {
        let current = self.sessions.len();
        if current >= self.config.max_sessions {
            return Err(SessionError::Capacity {
                current,
                max: self.config.max_sessions,
            });
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            tenant_id.into(),
            user_id,
            transport,
            self.config.replay_buffer_size,
            &self.shutdown,
        ));
        self.sessions.insert(id.clone(), Arc::clone(&session));
        debug!(session_id = %id, tenant_id = %session.tenant_id(), transport = %transport, "session opened");
        Ok(session)
    }

    /// Look up a live session by id
    pub fn lookup(&self, id: &str) -> SessionResult<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Record activity on a session
    pub fn touch(&self, id: &str) -> SessionResult<()> {
        self.lookup(id)?.touch()
    }

    /// Close a session: cancel in-flight work, drain, remove
    ///
    /// The terminal `Closed` transition and removal happen after the drain
    /// timeout on a detached task so close returns promptly.
    pub fn close(&self, id: &str) -> SessionResult<()> {
        let session = self.lookup(id)?;
        session.begin_close();
        info!(session_id = %id, "session closing");

        let sessions = Arc::clone(&self.sessions);
        let drain = self.config.drain_timeout;
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            if let Some((_, session)) = sessions.remove(&id) {
                session.finish_close();
                debug!(session_id = %id, "session closed");
            }
        });
        Ok(())
    }

    /// Sessions matching a filter
    pub fn enumerate(&self, filter: &SessionFilter) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of open sessions
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of open sessions on one transport
    pub fn count_for(&self, transport: TransportKind) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().transport() == transport)
            .count()
    }

    /// Run one reap pass: idle out stale sessions, close expired ones
    ///
    /// Split out from the background loop so tests can drive it directly.
    pub fn reap_once(&self) {
        let timeout = self.config.session_timeout;
        let grace = self.config.idle_grace;
        let mut to_close = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            match session.state() {
                SessionState::Created | SessionState::Active => {
                    if session.idle_for() > timeout {
                        session.mark_idle();
                        debug!(session_id = %session.id(), "session idle");
                    }
                }
                SessionState::Idle => {
                    if session.idle_for() > timeout + grace {
                        to_close.push(session.id().to_string());
                    }
                }
                SessionState::Closing | SessionState::Closed => {}
            }
        }

        for id in to_close {
            let _ = self.close(&id);
        }
    }

    /// Spawn the background reaper; exits on gateway shutdown
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.config.reap_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => registry.reap_once(),
                    _ = shutdown.cancelled() => {
                        debug!("session reaper stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry(config: SessionConfig) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(config, CancellationToken::new()))
    }

    #[tokio::test]
    async fn open_lookup_touch_close() {
        let registry = registry(SessionConfig::default());
        let session = registry
            .open("acme", None, TransportKind::Http)
            .unwrap();
        let id = session.id().to_string();

        assert!(registry.lookup(&id).is_ok());
        registry.touch(&id).unwrap();
        assert_eq!(registry.lookup(&id).unwrap().state(), SessionState::Active);

        registry.close(&id).unwrap();
        assert_eq!(registry.lookup(&id).unwrap().state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = registry(SessionConfig::default());
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let session = registry.open("acme", None, TransportKind::Http).unwrap();
            assert!(seen.insert(session.id().to_string()));
        }
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let registry = registry(SessionConfig {
            max_sessions: 2,
            ..SessionConfig::default()
        });
        registry.open("acme", None, TransportKind::Http).unwrap();
        registry.open("acme", None, TransportKind::Http).unwrap();
        assert!(matches!(
            registry.open("acme", None, TransportKind::Http),
            Err(SessionError::Capacity { .. })
        ));
    }

    #[tokio::test]
    async fn reaper_idles_and_closes_stale_sessions() {
        let registry = registry(SessionConfig {
            session_timeout: Duration::from_millis(10),
            idle_grace: Duration::from_millis(10),
            drain_timeout: Duration::from_millis(1),
            ..SessionConfig::default()
        });
        let session = registry.open("acme", None, TransportKind::Sse).unwrap();
        let id = session.id().to_string();

        tokio::time::sleep(Duration::from_millis(15)).await;
        registry.reap_once();
        assert_eq!(session.state(), SessionState::Idle);

        tokio::time::sleep(Duration::from_millis(15)).await;
        registry.reap_once();
        assert!(matches!(
            registry.lookup(&id).map(|s| s.state()),
            Ok(SessionState::Closing) | Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn enumerate_filters_by_tenant_and_transport() {
        let registry = registry(SessionConfig::default());
        registry.open("acme", None, TransportKind::Http).unwrap();
        registry.open("acme", None, TransportKind::Sse).unwrap();
        registry.open("globex", None, TransportKind::Sse).unwrap();

        let acme = registry.enumerate(&SessionFilter {
            tenant_id: Some("acme".to_string()),
            ..SessionFilter::default()
        });
        assert_eq!(acme.len(), 2);

        let sse = registry.enumerate(&SessionFilter {
            transport: Some(TransportKind::Sse),
            ..SessionFilter::default()
        });
        assert_eq!(sse.len(), 2);
        assert_eq!(registry.count_for(TransportKind::Sse), 2);
    }
}
