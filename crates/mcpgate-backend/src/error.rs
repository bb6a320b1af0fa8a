//! Backend error types

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from backend invocation and lifecycle
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Target id not in the pool
    #[error("unknown backend target: {0}")]
    UnknownTarget(String),

    /// Target is unhealthy or its process is past the restart cap
    #[error("backend unavailable: {target}: {reason}")]
    Unavailable {
        /// Target id
        target: String,
        /// Why it is unavailable
        reason: String,
    },

    /// The call exceeded the target's (or the request's) deadline
    #[error("backend timeout: {target} after {elapsed_ms}ms")]
    Timeout {
        /// Target id
        target: String,
        /// How long the call ran
        elapsed_ms: u64,
    },

    /// The backend answered with a non-retryable HTTP status
    #[error("backend {target} returned status {status}")]
    Status {
        /// Target id
        target: String,
        /// HTTP status code
        status: u16,
    },

    /// The backend's reply was not parseable
    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// Connection-level failure (dial, write, unexpected close)
    #[error("backend connection error: {0}")]
    Connection(String),

    /// The in-flight call was cancelled (client disconnect or shutdown)
    #[error("backend call cancelled")]
    Cancelled,

    /// Target configuration is invalid
    #[error("backend configuration error: {0}")]
    Configuration(String),

    /// IO error from the child process path
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Unavailable constructor
    pub fn unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry may help
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}
