//! Persisted plugin descriptors
//!
//! The control plane stores one row per (tenant, name); this is its parsed
//! form. The type tag string is decoded into [`PluginType`] once at load, and
//! a tenant's chain is totally ordered by (priority, created_at).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::PluginError;

/// Enumerated plugin types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginType {
    /// Pattern matching with per-pattern action and optional replacement
    Regex,
    /// Fixed keyword deny list
    Deny,
    /// Structured PII detectors with redaction
    Pii,
    /// Token-bucket resource quota
    ResourceQuota,
    /// External moderation classifier, variant A
    ExternalModerationA,
    /// External moderation classifier, variant B
    ExternalModerationB,
    /// Operator-supplied LLM classifier (external engine)
    CustomLlm,
}

impl PluginType {
    /// Stable tag stored by the control plane
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Deny => "deny",
            Self::Pii => "pii",
            Self::ResourceQuota => "resource-quota",
            Self::ExternalModerationA => "external-moderation-a",
            Self::ExternalModerationB => "external-moderation-b",
            Self::CustomLlm => "custom-llm",
        }
    }

    /// Whether applications of this type reach an external service
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::ExternalModerationA | Self::ExternalModerationB | Self::CustomLlm
        )
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regex" => Ok(Self::Regex),
            "deny" => Ok(Self::Deny),
            "pii" => Ok(Self::Pii),
            "resource-quota" => Ok(Self::ResourceQuota),
            "external-moderation-a" => Ok(Self::ExternalModerationA),
            "external-moderation-b" => Ok(Self::ExternalModerationB),
            "custom-llm" => Ok(Self::CustomLlm),
            other => Err(PluginError::UnknownType(other.to_string())),
        }
    }
}

/// Per-plugin execution policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Actions apply as reported; a `block` rejects the request
    #[default]
    Enforcing,
    /// `block` is downgraded to `audit`
    Permissive,
    /// Every contribution is forced to `audit`
    AuditOnly,
    /// Skipped entirely, no side effects
    Disabled,
}

impl ExecutionMode {
    /// Stable tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enforcing => "enforcing",
            Self::Permissive => "permissive",
            Self::AuditOnly => "audit_only",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted plugin record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Row id from the store
    pub id: String,
    /// Owning tenant; `(tenant_id, name)` is unique
    #[serde(rename = "organization_id")]
    pub tenant_id: String,
    /// Plugin name, unique within the tenant
    pub name: String,
    /// Operator-facing description
    #[serde(default)]
    pub description: String,
    /// Plugin type tag, parsed once at load
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Whether the descriptor participates in the chain at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Chain position; lower fires first, ties broken by `created_at`
    pub priority: i64,
    /// Opaque configuration tree, decoded by the plugin's typed config
    #[serde(default)]
    pub config: Value,
    /// Execution policy
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Creation timestamp (tie-breaker in the chain order)
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
    /// Operator who created the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl PluginDescriptor {
    /// Minimal descriptor for a tenant; timestamps are set to now
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        plugin_type: PluginType,
        priority: i64,
        config: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: String::new(),
            plugin_type,
            enabled: true,
            priority,
            config,
            mode: ExecutionMode::Enforcing,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    /// Builder-style execution mode override
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder-style enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Chain ordering key: (priority, created_at)
    pub fn order_key(&self) -> (i64, DateTime<Utc>) {
        (self.priority, self.created_at)
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_tags_round_trip() {
        for tag in [
            "regex",
            "deny",
            "pii",
            "resource-quota",
            "external-moderation-a",
            "external-moderation-b",
            "custom-llm",
        ] {
            let parsed: PluginType = tag.parse().unwrap();
            assert_eq!(parsed.as_str(), tag);
        }
        assert!(matches!(
            "sentiment".parse::<PluginType>(),
            Err(PluginError::UnknownType(_))
        ));
    }

    #[test]
    fn descriptor_serde_uses_store_field_names() {
        let desc = PluginDescriptor::new("acme", "no-secrets", PluginType::Regex, 10, json!({}));
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["organization_id"], json!("acme"));
        assert_eq!(value["type"], json!("regex"));
        assert_eq!(value["mode"], json!("enforcing"));
    }

    #[test]
    fn order_key_breaks_priority_ties_by_creation() {
        let a = PluginDescriptor::new("t", "a", PluginType::Deny, 5, json!({}));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = PluginDescriptor::new("t", "b", PluginType::Deny, 5, json!({}));
        assert!(a.order_key() < b.order_key());
    }
}
