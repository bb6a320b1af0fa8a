//! Tenant chain export/import
//!
//! The interchange document is versioned JSON: an organization id plus the
//! ordered descriptor array. Round-tripping a tenant through export/import is
//! identity at the descriptor level - names, priorities, configs, and modes
//! survive; creation timestamps are refreshed on import in a way that keeps
//! the chain order stable.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::PluginDescriptor;
use crate::error::{PluginError, PluginResult as PluginOpResult};

/// Supported document version
pub const DOCUMENT_VERSION: &str = "1";

/// Interchange document for one tenant's plugin chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfigDocument {
    /// Document schema version
    pub version: String,
    /// Owning tenant
    #[serde(rename = "organization_id")]
    pub tenant_id: String,
    /// Descriptors in chain order
    pub plugins: Vec<PluginDescriptor>,
}

impl PluginConfigDocument {
    /// Build an export document from a tenant's descriptors
    pub fn from_descriptors(tenant: &str, mut descriptors: Vec<PluginDescriptor>) -> Self {
        descriptors.sort_by_key(PluginDescriptor::order_key);
        Self {
            version: DOCUMENT_VERSION.to_string(),
            tenant_id: tenant.to_string(),
            plugins: descriptors,
        }
    }

    /// Validate the document and produce fresh descriptors
    ///
    /// Timestamps are refreshed to import time; within the document, each
    /// descriptor gets a strictly later `created_at` than its predecessor so
    /// priority ties keep their exported order.
    pub fn into_descriptors(self) -> PluginOpResult<Vec<PluginDescriptor>> {
        if self.version != DOCUMENT_VERSION {
            return Err(PluginError::InvalidDocument(format!(
                "unsupported version: {}",
                self.version
            )));
        }
        if self.tenant_id.is_empty() {
            return Err(PluginError::InvalidDocument(
                "organization_id must not be empty".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let base = Utc::now();
        let mut descriptors = Vec::with_capacity(self.plugins.len());
        for (index, mut descriptor) in self.plugins.into_iter().enumerate() {
            if !seen.insert(descriptor.name.clone()) {
                return Err(PluginError::InvalidDocument(format!(
                    "duplicate plugin name: {}",
                    descriptor.name
                )));
            }
            descriptor.tenant_id = self.tenant_id.clone();
            descriptor.created_at = base + ChronoDuration::milliseconds(index as i64);
            descriptor.updated_at = descriptor.created_at;
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ExecutionMode, PluginType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_chain() -> Vec<PluginDescriptor> {
        vec![
            PluginDescriptor::new(
                "acme",
                "denylist",
                PluginType::Deny,
                10,
                json!({"keywords": ["a"]}),
            )
            .with_mode(ExecutionMode::Permissive),
            PluginDescriptor::new(
                "acme",
                "pii-guard",
                PluginType::Pii,
                20,
                json!({"action": "redact"}),
            ),
        ]
    }

    #[test]
    fn round_trip_is_identity_at_the_descriptor_level() {
        let document = PluginConfigDocument::from_descriptors("acme", sample_chain());
        let exported = serde_json::to_string(&document).unwrap();
        let reparsed: PluginConfigDocument = serde_json::from_str(&exported).unwrap();
        let imported = reparsed.into_descriptors().unwrap();

        let original = sample_chain();
        assert_eq!(imported.len(), original.len());
        for (a, b) in imported.iter().zip(original.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.plugin_type, b.plugin_type);
            assert_eq!(a.priority, b.priority);
            assert_eq!(a.config, b.config);
            assert_eq!(a.mode, b.mode);
            assert_eq!(a.enabled, b.enabled);
        }
    }

    #[test]
    fn import_preserves_order_on_priority_ties() {
        let mut chain = sample_chain();
        for descriptor in &mut chain {
            descriptor.priority = 5;
        }
        let document = PluginConfigDocument::from_descriptors("acme", chain);
        let imported = document.into_descriptors().unwrap();
        assert!(imported[0].order_key() < imported[1].order_key());
        assert_eq!(imported[0].name, "denylist");
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut document = PluginConfigDocument::from_descriptors("acme", sample_chain());
        document.version = "2".to_string();
        assert!(matches!(
            document.into_descriptors(),
            Err(PluginError::InvalidDocument(_))
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut chain = sample_chain();
        chain[1].name = chain[0].name.clone();
        let document = PluginConfigDocument::from_descriptors("acme", chain);
        assert!(document.into_descriptors().is_err());
    }
}
