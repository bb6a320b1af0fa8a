//! The mcpgate gateway runtime.
//!
//! mcpgate is a multi-tenant gateway between clients and a fleet of MCP
//! servers. It terminates five client transports (JSON-RPC over HTTP, SSE,
//! WebSocket, streamable MCP, STDIO), runs each tenant's content plugin
//! chain at four direction points, and forwards to HTTP, WebSocket, or
//! supervised STDIO backends.
//!
//! This crate assembles the pieces: [`config`] and [`server`] for wiring,
//! [`dispatcher`] for the pipeline, [`endpoints`] for the client-facing
//! surface, [`metrics`] and [`audit`] for observability, [`auth`] for the
//! identity seam.

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod metrics;
pub mod routing;
pub mod server;
pub mod stdio_endpoint;

pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth::{AuthProvider, Identity, StaticAuthProvider};
pub use config::GatewayConfig;
pub use dispatcher::{Dispatcher, StreamRoute};
pub use error::{ServerError, ServerResult};
pub use metrics::GatewayMetrics;
pub use routing::{RouteRule, RoutingTable};
pub use server::{GatewayBuilder, GatewayContext, GatewayServer};
