//! Resource-quota plugin
//!
//! A GCRA bucket per (tenant, user) key. An empty bucket blocks; otherwise
//! the call is debited and allowed. Buckets are process-local: multi-replica
//! deployments rate-limit per replica.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};

use mcpgate_protocol::{Content, Direction, RequestEnvelope};

use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
use crate::result::{PluginResult, Violation};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Typed config for the resource-quota plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaPluginConfig {
    /// Requests admitted per window (default: 100)
    #[serde(default = "default_requests")]
    pub requests_per_window: u32,
    /// Window length in seconds (default: 60)
    #[serde(default = "default_window")]
    pub window_secs: u64,
    /// Burst capacity (default: `requests_per_window`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

fn default_requests() -> u32 {
    100
}

fn default_window() -> u64 {
    60
}

/// Process-local quota plugin instance
pub struct QuotaPlugin {
    name: String,
    limiter: KeyedLimiter,
    capabilities: PluginCapabilities,
}

impl QuotaPlugin {
    /// Build from a descriptor, validating the bucket parameters
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> PluginOpResult<Self> {
        let config: QuotaPluginConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;

        if config.requests_per_window == 0 || config.window_secs == 0 {
            return Err(PluginError::invalid_config(
                &descriptor.name,
                "requests_per_window and window_secs must be positive",
            ));
        }

        let period =
            Duration::from_secs(config.window_secs) / config.requests_per_window;
        let quota = Quota::with_period(period).ok_or_else(|| {
            PluginError::invalid_config(&descriptor.name, "window too small for the request rate")
        })?;
        let burst = config.burst.unwrap_or(config.requests_per_window);
        let burst = NonZeroU32::new(burst).ok_or_else(|| {
            PluginError::invalid_config(&descriptor.name, "burst must be positive")
        })?;
        let limiter = RateLimiter::keyed(quota.allow_burst(burst));

        Ok(Self {
            name: descriptor.name.clone(),
            limiter,
            capabilities: PluginCapabilities::all_directions()
                .with_directions([Direction::Inbound])
                .blocking(),
        })
    }

    fn bucket_key(cx: &PluginContext) -> String {
        match &cx.user_id {
            Some(user) => format!("{}:{user}", cx.tenant_id),
            None => cx.tenant_id.clone(),
        }
    }
}

#[async_trait]
impl ContentPlugin for QuotaPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::ResourceQuota
    }

    fn capabilities(&self) -> &PluginCapabilities {
        &self.capabilities
    }

    async fn apply(
        &self,
        cx: &PluginContext,
        _envelope: &RequestEnvelope,
        _content: &Content,
    ) -> PluginOpResult<PluginApplication> {
        let key = Self::bucket_key(cx);
        match self.limiter.check_key(&key) {
            Ok(()) => Ok((PluginResult::allow(), None)),
            Err(_) => {
                let result = PluginResult::block(format!("quota exhausted for {key}"))
                    .with_violations(vec![
                        Violation::new("quota", "quota", "medium").with_pattern(key),
                    ]);
                Ok((result, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::PluginAction;
    use serde_json::json;

    fn plugin(config: serde_json::Value) -> QuotaPlugin {
        let desc = PluginDescriptor::new("acme", "quota", PluginType::ResourceQuota, 10, config);
        QuotaPlugin::from_descriptor(&desc).unwrap()
    }

    async fn check(plugin: &QuotaPlugin, cx: &PluginContext) -> PluginAction {
        let env = RequestEnvelope::new(
            "1",
            "tools/call",
            json!({}),
            mcpgate_protocol::TransportKind::Http,
        );
        plugin
            .apply(cx, &env, &Content::text(""))
            .await
            .unwrap()
            .0
            .action
    }

    #[tokio::test]
    async fn bucket_empties_then_blocks() {
        let plugin = plugin(json!({"requests_per_window": 2, "window_secs": 3600, "burst": 2}));
        let cx = PluginContext::new("acme").with_user("u1");
        assert_eq!(check(&plugin, &cx).await, PluginAction::Allow);
        assert_eq!(check(&plugin, &cx).await, PluginAction::Allow);
        assert_eq!(check(&plugin, &cx).await, PluginAction::Block);
    }

    #[tokio::test]
    async fn buckets_are_keyed_per_user() {
        let plugin = plugin(json!({"requests_per_window": 1, "window_secs": 3600, "burst": 1}));
        let u1 = PluginContext::new("acme").with_user("u1");
        let u2 = PluginContext::new("acme").with_user("u2");
        assert_eq!(check(&plugin, &u1).await, PluginAction::Allow);
        assert_eq!(check(&plugin, &u1).await, PluginAction::Block);
        // A different user has an untouched bucket.
        assert_eq!(check(&plugin, &u2).await, PluginAction::Allow);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let desc = PluginDescriptor::new(
            "acme",
            "quota",
            PluginType::ResourceQuota,
            10,
            json!({"requests_per_window": 0}),
        );
        assert!(QuotaPlugin::from_descriptor(&desc).is_err());
    }
}
