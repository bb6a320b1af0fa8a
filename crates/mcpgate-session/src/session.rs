//! Session state and streaming fan-out

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mcpgate_protocol::TransportKind;

use crate::error::{SessionError, SessionResult};
use crate::replay::{ReplayBuffer, StoredFrame};

/// Session lifecycle state machine
///
/// `Created → Active → Idle → Closing → Closed`. `Idle` is entered by the
/// reaper after the idle timeout; `Closing` on explicit close or transport
/// disconnect; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opened, no activity yet
    Created,
    /// Seen activity within the idle window
    Active,
    /// Past the idle timeout without a touch
    Idle,
    /// Draining in-flight work
    Closing,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Stable tag for logs and status documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Outbound queue depth per subscriber; a subscriber that falls this far
/// behind is dropped and recovers through replay on reconnect
const SUBSCRIBER_QUEUE: usize = 256;

struct SessionMut {
    state: SessionState,
    last_activity: Instant,
    buffer: Option<ReplayBuffer>,
    subscribers: Vec<mpsc::Sender<StoredFrame>>,
}

/// One client correlation context
///
/// Immutable identity fields plus a small mutable core behind the session's
/// own lock; the lock is never held across an await point.
pub struct Session {
    id: String,
    tenant_id: String,
    user_id: Option<String>,
    transport: TransportKind,
    created_at: Instant,
    cancel: CancellationToken,
    inner: Mutex<SessionMut>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("transport", &self.transport)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        tenant_id: String,
        user_id: Option<String>,
        transport: TransportKind,
        buffer_capacity: usize,
        parent_cancel: &CancellationToken,
    ) -> Self {
        // Streaming transports own a replay buffer; unary ones do not.
        let buffer = transport
            .is_streaming()
            .then(|| ReplayBuffer::new(buffer_capacity));
        Self {
            id,
            tenant_id,
            user_id,
            transport,
            created_at: Instant::now(),
            cancel: parent_cancel.child_token(),
            inner: Mutex::new(SessionMut {
                state: SessionState::Created,
                last_activity: Instant::now(),
                buffer,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Opaque session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning tenant
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Authenticated user, when known
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Transport this session belongs to
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// When the session was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Cancellation signal for in-flight dispatches of this session
    ///
    /// A child of the registry's shutdown token: client disconnect, close,
    /// and gateway shutdown all propagate through it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record activity; revives `Created`/`Idle` sessions to `Active`
    ///
    /// Returns an error once the session is `Closing` or `Closed`.
    pub fn touch(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Closing | SessionState::Closed => Err(SessionError::Closed {
                id: self.id.clone(),
                state: inner.state.as_str().to_string(),
            }),
            _ => {
                inner.state = SessionState::Active;
                inner.last_activity = Instant::now();
                Ok(())
            }
        }
    }

    /// Time since the last touch
    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_activity.elapsed()
    }

    /// Move an active session to `Idle` (reaper only)
    pub(crate) fn mark_idle(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Created | SessionState::Active) {
            inner.state = SessionState::Idle;
        }
    }

    /// Enter `Closing` and fire the cancellation signal
    pub(crate) fn begin_close(&self) {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
                return;
            }
            inner.state = SessionState::Closing;
            inner.subscribers.clear();
        }
        self.cancel.cancel();
    }

    /// Terminal transition after drain
    pub(crate) fn finish_close(&self) {
        self.inner.lock().state = SessionState::Closed;
    }

    /// Append an outbound frame to the replay buffer and fan it out to all
    /// live subscribers
    ///
    /// Returns the stored frame (with its assigned event id), or an error on
    /// non-streaming transports.
    pub fn push_frame(
        &self,
        event: impl Into<String>,
        data: impl Into<String>,
    ) -> SessionResult<StoredFrame> {
        let mut inner = self.inner.lock();
        let Some(buffer) = inner.buffer.as_mut() else {
            return Err(SessionError::NotStreaming(self.transport.to_string()));
        };
        let frame = buffer.push(event, data);
        // Bounded fan-out: a full queue means the consumer stopped draining;
        // it is dropped here and resumes through replay.
        inner
            .subscribers
            .retain(|tx| tx.try_send(frame.clone()).is_ok());
        Ok(frame)
    }

    /// Subscribe to live outbound frames through a bounded queue
    pub fn subscribe(&self) -> mpsc::Receiver<StoredFrame> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Frames after `last_seen` still held in the buffer
    pub fn replay(&self, last_seen: u64) -> SessionResult<Vec<StoredFrame>> {
        let inner = self.inner.lock();
        let Some(buffer) = inner.buffer.as_ref() else {
            return Err(SessionError::NotStreaming(self.transport.to_string()));
        };
        buffer
            .replay_from(last_seen)
            .ok_or_else(|| SessionError::AlreadyDiscarded(self.id.clone()))
    }

    /// Highest event id assigned on this session (0 if none)
    pub fn last_event_id(&self) -> u64 {
        self.inner
            .lock()
            .buffer
            .as_ref()
            .map_or(0, ReplayBuffer::last_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_session() -> Session {
        Session::new(
            "s1".to_string(),
            "acme".to_string(),
            None,
            TransportKind::Sse,
            64,
            &CancellationToken::new(),
        )
    }

    #[test]
    fn touch_revives_created_and_idle() {
        let session = streaming_session();
        assert_eq!(session.state(), SessionState::Created);
        session.touch().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        session.mark_idle();
        assert_eq!(session.state(), SessionState::Idle);
        session.touch().unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn touch_fails_after_close() {
        let session = streaming_session();
        session.begin_close();
        assert_eq!(session.state(), SessionState::Closing);
        assert!(session.touch().is_err());
        assert!(session.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn push_frame_reaches_subscriber_and_buffer() {
        let session = streaming_session();
        let mut rx = session.subscribe();
        let frame = session.push_frame("message", "{}").unwrap();
        assert_eq!(frame.id, 1);
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(session.replay(0).unwrap().len(), 1);
    }

    #[test]
    fn unary_transport_has_no_buffer() {
        let session = Session::new(
            "s2".to_string(),
            "acme".to_string(),
            None,
            TransportKind::Http,
            64,
            &CancellationToken::new(),
        );
        assert!(matches!(
            session.push_frame("message", "{}"),
            Err(SessionError::NotStreaming(_))
        ));
    }
}
