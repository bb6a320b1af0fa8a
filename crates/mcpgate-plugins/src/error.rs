//! Plugin error types

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors from plugin construction and application
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PluginError {
    /// The descriptor's type tag is not a known plugin type
    #[error("unknown plugin type: {0}")]
    UnknownType(String),

    /// The type is known but cannot be instantiated in this process
    #[error("plugin type not supported here: {0}")]
    UnsupportedType(String),

    /// The descriptor's config tree failed to decode into the plugin's
    /// typed config
    #[error("invalid config for plugin '{name}': {message}")]
    InvalidConfig {
        /// Plugin name from the descriptor
        name: String,
        /// What was wrong
        message: String,
    },

    /// A plugin application exceeded its timeout
    #[error("plugin '{0}' timed out")]
    Timeout(String),

    /// An external service call failed after retries
    #[error("external service error in plugin '{name}': {message}")]
    External {
        /// Plugin name
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Descriptor addressed a tenant or name that does not exist
    #[error("plugin not found: {tenant}/{name}")]
    NotFound {
        /// Tenant id
        tenant: String,
        /// Plugin name
        name: String,
    },

    /// Import document was structurally invalid
    #[error("invalid plugin config document: {0}")]
    InvalidDocument(String),

    /// Internal failure during application
    #[error("plugin '{name}' failed: {message}")]
    Apply {
        /// Plugin name
        name: String,
        /// Failure detail
        message: String,
    },
}

impl PluginError {
    /// Invalid-config constructor
    pub fn invalid_config(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            message: message.into(),
        }
    }

    /// External-failure constructor
    pub fn external(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Apply-failure constructor
    pub fn apply(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Apply {
            name: name.into(),
            message: message.into(),
        }
    }
}
