//! Protocol error types

/// Result type for codec operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while translating between wire bytes and envelopes
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The bytes were not parseable at all (JSON syntax error, truncated SSE
    /// frame, invalid UTF-8)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The frame parsed but violates the protocol (missing required fields,
    /// wrong version tag, batch where a single call is required)
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// The method is well-formed but not in the registered method set
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

impl ProtocolError {
    /// JSON-RPC error code for this protocol error
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::MalformedFrame(_) => -32700,
            Self::InvalidProtocol(_) => -32600,
            Self::UnsupportedMethod(_) => -32601,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}
