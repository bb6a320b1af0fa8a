//! Backend pool for the mcpgate gateway.
//!
//! A backend target is a configured MCP server addressable by id over one of
//! three protocols. This crate owns connection lifecycle for each:
//!
//! - [`http`] - keep-alive pooled client with per-target in-flight caps and
//!   retryable-status classification
//! - [`websocket`] - one persistent connection per target with correlation-id
//!   multiplexing and a single-reconnect policy
//! - [`stdio`] - a supervised child process with restart caps and
//!   TERM-before-KILL shutdown
//!
//! [`pool::BackendPool`] fronts all targets, gates calls on health, and is
//! the only surface the dispatcher sees.

pub mod error;
pub mod health;
pub mod http;
pub mod pool;
pub mod retry;
pub mod stdio;
pub mod target;
pub mod websocket;

pub use error::{BackendError, BackendResult};
pub use health::{HealthState, HealthThresholds, HealthTracker};
pub use pool::BackendPool;
pub use retry::RetryPolicy;
pub use target::{BackendProtocol, BackendTarget};
