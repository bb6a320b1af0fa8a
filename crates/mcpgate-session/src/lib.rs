//! Session registry for the mcpgate gateway.
//!
//! A session is the correlation context for one client connection (or a
//! reconnecting SSE/WebSocket client). The registry assigns ids, tracks the
//! lifecycle state machine, owns per-session replay buffers for streaming
//! transports, and reaps idle sessions in the background.

pub mod error;
pub mod registry;
pub mod replay;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use registry::{SessionConfig, SessionFilter, SessionRegistry};
pub use replay::{ReplayBuffer, StoredFrame};
pub use session::{Session, SessionState};
