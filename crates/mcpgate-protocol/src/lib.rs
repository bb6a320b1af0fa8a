//! Wire types and codec for the mcpgate gateway.
//!
//! This crate owns everything that crosses a transport boundary:
//!
//! - [`jsonrpc`] - JSON-RPC 2.0 request/response/notification types with the
//!   gateway's reserved error codes
//! - [`envelope`] - the protocol-neutral [`RequestEnvelope`] and the
//!   [`Content`] payload that plugins inspect
//! - [`streamable`] - the streamable MCP POST body and capabilities document
//! - [`sse`] - Server-Sent Events framing (parse and emit)
//! - [`codec`] - `decode`/`encode` between wire bytes and envelopes
//!
//! Everything here is transport-agnostic data plus pure functions; no I/O.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod jsonrpc;
pub mod sse;
pub mod streamable;

pub use codec::{decode, encode, is_registered_method};
pub use envelope::{Content, ContentType, Direction, HeaderMap, RequestEnvelope, TransportKind};
pub use error::{ProtocolError, ProtocolResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcVersion, RequestId, ResponseId,
};
pub use sse::SseFrame;
pub use streamable::{CapabilitiesDocument, StreamMode, StreamableRequest};
