//! Content plugin chain for the mcpgate gateway.
//!
//! Tenants configure an ordered chain of content plugins; the dispatcher runs
//! the chain at four direction points (inbound, pre-tool, post-tool,
//! outbound). This crate owns:
//!
//! - [`descriptor`] - the persisted plugin record and its enums
//! - [`plugin`] - the [`ContentPlugin`] trait, capabilities, and context
//! - [`result`] - per-plugin results, violations, and the action ordering
//! - [`registry`] - plugin-type to constructor mapping
//! - [`manager`] - per-tenant chains with copy-on-replace reloads
//! - [`builtin`] - the built-in plugin set (regex, deny, PII, quota,
//!   external moderation)
//! - [`config_io`] - tenant chain export/import documents

pub mod builtin;
pub mod config_io;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod result;

pub use config_io::PluginConfigDocument;
pub use descriptor::{ExecutionMode, PluginDescriptor, PluginType};
pub use error::{PluginError, PluginResult as PluginOpResult};
pub use manager::{ChainOutcome, PluginManager, PluginTimeouts};
pub use plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
pub use registry::PluginRegistry;
pub use result::{PluginAction, PluginResult, Violation};
