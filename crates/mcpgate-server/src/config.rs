//! Gateway configuration
//!
//! Loaded from TOML by the binary. Per-tenant fields are optional overrides
//! that fall back to the global defaults; only specified fields override.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mcpgate_backend::BackendTarget;
use mcpgate_plugins::{PluginConfigDocument, PluginTimeouts};
use mcpgate_session::SessionConfig;

use crate::error::{ServerError, ServerResult};
use crate::routing::RouteRule;

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Session registry settings
    #[serde(default)]
    pub session: SessionSettings,
    /// Global tenant defaults
    #[serde(default)]
    pub defaults: TenantDefaults,
    /// Per-tenant overrides and seeds
    #[serde(default)]
    pub tenants: HashMap<String, TenantConfig>,
    /// Backend targets
    #[serde(default)]
    pub backends: Vec<BackendTarget>,
    /// Routing rules
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Authentication settings
    #[serde(default)]
    pub auth: AuthSettings,
    /// Optional STDIO endpoint (the process serves one tenant on its stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdio: Option<StdioEndpointSettings>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            session: SessionSettings::default(),
            defaults: TenantDefaults::default(),
            tenants: HashMap::new(),
            backends: Vec::new(),
            routes: Vec::new(),
            auth: AuthSettings::default(),
            stdio: None,
        }
    }
}

/// Session registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Idle window in seconds before a session is marked idle
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,
    /// Grace in seconds an idle session survives
    #[serde(default = "default_idle_grace")]
    pub idle_grace_secs: u64,
    /// Reaper tick interval in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    /// Replay ring capacity for streaming sessions
    #[serde(default = "default_replay_buffer")]
    pub replay_buffer_size: usize,
    /// Maximum concurrently open sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_session_timeout() -> u64 {
    300
}

fn default_idle_grace() -> u64 {
    60
}

fn default_reap_interval() -> u64 {
    10
}

fn default_replay_buffer() -> usize {
    256
}

fn default_max_sessions() -> usize {
    10_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            idle_grace_secs: default_idle_grace(),
            reap_interval_secs: default_reap_interval(),
            replay_buffer_size: default_replay_buffer(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl SessionSettings {
    /// Convert to the registry's config type
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            session_timeout: Duration::from_secs(self.timeout_secs),
            idle_grace: Duration::from_secs(self.idle_grace_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
            replay_buffer_size: self.replay_buffer_size,
            max_sessions: self.max_sessions,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Global defaults a tenant may override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDefaults {
    /// Overall request deadline in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Local plugin budget in milliseconds
    #[serde(default = "default_plugin_local")]
    pub plugin_timeout_local_ms: u64,
    /// External plugin budget in milliseconds
    #[serde(default = "default_plugin_external")]
    pub plugin_timeout_external_ms: u64,
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_plugin_local() -> u64 {
    5_000
}

fn default_plugin_external() -> u64 {
    30_000
}

impl Default for TenantDefaults {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            plugin_timeout_local_ms: default_plugin_local(),
            plugin_timeout_external_ms: default_plugin_external(),
        }
    }
}

impl TenantDefaults {
    /// Plugin timeouts for the manager
    pub fn plugin_timeouts(&self) -> PluginTimeouts {
        PluginTimeouts {
            local: Duration::from_millis(self.plugin_timeout_local_ms),
            external: Duration::from_millis(self.plugin_timeout_external_ms),
        }
    }
}

/// Per-tenant overrides; unspecified fields fall back to the defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Overall request deadline override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Whether the tenant accepts requests (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Seed plugin chain, in the import/export document format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginConfigDocument>,
}

impl TenantConfig {
    /// Whether the tenant is active
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }
}

/// Authentication settings for the static provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Tenant assigned to unauthenticated requests; `None` rejects them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tenant: Option<String>,
    /// API key to identity mapping
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKeyIdentity>,
}

/// Identity one API key resolves to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyIdentity {
    /// Tenant the key belongs to
    pub tenant_id: String,
    /// User the key identifies, when keys are per-user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// STDIO endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioEndpointSettings {
    /// Tenant the stdio connection serves
    pub tenant_id: String,
}

impl GatewayConfig {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ServerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references (routes point at registered backends)
    pub fn validate(&self) -> ServerResult<()> {
        for route in &self.routes {
            if !self.backends.iter().any(|b| b.id == route.target) {
                return Err(ServerError::Configuration(format!(
                    "route for '{}' references unknown backend '{}'",
                    route.method, route.target
                )));
            }
        }
        if let Some(stdio) = &self.stdio
            && stdio.tenant_id.is_empty()
        {
            return Err(ServerError::Configuration(
                "stdio endpoint requires a tenant_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Request deadline for a tenant
    pub fn request_timeout(&self, tenant_id: &str) -> Duration {
        let ms = self
            .tenants
            .get(tenant_id)
            .and_then(|t| t.request_timeout_ms)
            .unwrap_or(self.defaults.request_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Whether a tenant may send requests (unknown tenants are active)
    pub fn tenant_active(&self, tenant_id: &str) -> bool {
        self.tenants.get(tenant_id).is_none_or(TenantConfig::is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.defaults.request_timeout_ms, 30_000);
        assert_eq!(config.session.replay_buffer_size, 256);
    }

    #[test]
    fn full_toml_round_trip() {
        let text = r#"
bind_addr = "0.0.0.0:9090"

[session]
timeout_secs = 120

[defaults]
request_timeout_ms = 10000

[tenants.acme]
request_timeout_ms = 5000

[auth]
default_tenant = "acme"

[auth.api_keys.key-123]
tenant_id = "acme"
user_id = "jane"

[[backends]]
id = "tools"
protocol = "http"
url = "http://localhost:9000/rpc"

[[routes]]
tenant = "acme"
method = "*"
target = "tools"
"#;
        let config = GatewayConfig::from_toml(text).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9090");
        assert_eq!(
            config.request_timeout("acme"),
            Duration::from_millis(5000)
        );
        assert_eq!(
            config.request_timeout("other"),
            Duration::from_millis(10000)
        );
        assert_eq!(config.auth.api_keys["key-123"].tenant_id, "acme");
    }

    #[test]
    fn dangling_route_is_rejected() {
        let text = r#"
[[routes]]
tenant = "acme"
method = "*"
target = "missing"
"#;
        assert!(GatewayConfig::from_toml(text).is_err());
    }

    #[test]
    fn inactive_tenant() {
        let mut config = GatewayConfig::default();
        config.tenants.insert(
            "dormant".to_string(),
            TenantConfig {
                active: Some(false),
                ..TenantConfig::default()
            },
        );
        assert!(!config.tenant_active("dormant"));
        assert!(config.tenant_active("anyone-else"));
    }
}
