//! Authentication seam
//!
//! The gateway consumes identity, it does not issue it: OAuth and API-key
//! provisioning live in the control plane. [`AuthProvider`] is the narrow
//! interface the endpoints call with the request headers; the static
//! provider resolves config-declared API keys and is enough for deployments
//! that front the gateway with their own auth proxy.

use async_trait::async_trait;
use std::collections::HashMap;

use mcpgate_protocol::HeaderMap;

use crate::config::AuthSettings;
use crate::error::{ServerError, ServerResult};

/// Authenticated request identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Tenant the request belongs to
    pub tenant_id: String,
    /// User within the tenant, when known
    pub user_id: Option<String>,
}

impl Identity {
    /// Identity with no user attribution
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
        }
    }
}

/// Resolves request headers to an identity
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate one request
    async fn authenticate(&self, headers: &HeaderMap) -> ServerResult<Identity>;
}

/// Config-driven API key provider
///
/// Looks for `Authorization: Bearer <key>` then `X-API-Key: <key>`. Requests
/// without a recognized key fall back to the default tenant, or fail when no
/// default is configured.
#[derive(Debug, Clone)]
pub struct StaticAuthProvider {
    keys: HashMap<String, Identity>,
    default_tenant: Option<String>,
}

impl StaticAuthProvider {
    /// Build from the config's auth settings
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let keys = settings
            .api_keys
            .iter()
            .map(|(key, identity)| {
                (
                    key.clone(),
                    Identity {
                        tenant_id: identity.tenant_id.clone(),
                        user_id: identity.user_id.clone(),
                    },
                )
            })
            .collect();
        Self {
            keys,
            default_tenant: settings.default_tenant.clone(),
        }
    }

    fn extract_key(headers: &HeaderMap) -> Option<String> {
        if let Some(authorization) = headers.get("authorization")
            && let Some(token) = authorization.strip_prefix("Bearer ")
        {
            return Some(token.trim().to_string());
        }
        headers.get("x-api-key").map(str::to_string)
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> ServerResult<Identity> {
        if let Some(key) = Self::extract_key(headers) {
            if let Some(identity) = self.keys.get(&key) {
                return Ok(identity.clone());
            }
            return Err(ServerError::Authentication("unknown api key".to_string()));
        }
        match &self.default_tenant {
            Some(tenant) => Ok(Identity::tenant(tenant.clone())),
            None => Err(ServerError::Authentication(
                "missing credentials".to_string(),
            )),
        }
    }
}
