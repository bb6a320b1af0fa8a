//! Session error types

/// Result type for registry operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from the session registry
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// No session with the given id
    #[error("session not found: {0}")]
    NotFound(String),

    /// The replay cursor points before the oldest buffered frame
    #[error("replay window discarded for session {0}")]
    AlreadyDiscarded(String),

    /// The session exists but is past the point of accepting work
    #[error("session {id} is {state}")]
    Closed {
        /// Session id
        id: String,
        /// State the session was found in
        state: String,
    },

    /// The registry is at its configured session cap
    #[error("session capacity reached: {current}/{max}")]
    Capacity {
        /// Sessions currently open
        current: usize,
        /// Configured maximum
        max: usize,
    },

    /// The transport does not own a replay buffer
    #[error("transport {0} has no replay buffer")]
    NotStreaming(String),
}
