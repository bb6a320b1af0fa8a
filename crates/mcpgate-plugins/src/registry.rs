//! Plugin type registry
//!
//! Maps each enumerated [`PluginType`] to a constructor. Built once at
//! startup into the process context and passed explicitly; descriptors are
//! instantiated through it after their type tag has been parsed into the
//! enum. Tests (and embedders) may override individual constructors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{DenyPlugin, ModerationPlugin, ModerationVariant, PiiPlugin, QuotaPlugin, RegexPlugin};
use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::ContentPlugin;

/// Constructor for one plugin type
pub type PluginConstructor =
    Box<dyn Fn(&PluginDescriptor) -> PluginOpResult<Arc<dyn ContentPlugin>> + Send + Sync>;

/// Type-to-constructor mapping
pub struct PluginRegistry {
    constructors: HashMap<PluginType, PluginConstructor>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Registry with every built-in type registered
    ///
    /// `http` is the shared client used by external plugins, so classifier
    /// calls ride one connection pool.
    pub fn new(http: reqwest::Client) -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };

        registry.register(PluginType::Regex, |descriptor| {
            Ok(Arc::new(RegexPlugin::from_descriptor(descriptor)?))
        });
        registry.register(PluginType::Deny, |descriptor| {
            Ok(Arc::new(DenyPlugin::from_descriptor(descriptor)?))
        });
        registry.register(PluginType::Pii, |descriptor| {
            Ok(Arc::new(PiiPlugin::from_descriptor(descriptor)?))
        });
        registry.register(PluginType::ResourceQuota, |descriptor| {
            Ok(Arc::new(QuotaPlugin::from_descriptor(descriptor)?))
        });

        let client = http.clone();
        registry.register(PluginType::ExternalModerationA, move |descriptor| {
            Ok(Arc::new(ModerationPlugin::from_descriptor(
                descriptor,
                ModerationVariant::A,
                client.clone(),
            )?))
        });
        let client = http;
        registry.register(PluginType::ExternalModerationB, move |descriptor| {
            Ok(Arc::new(ModerationPlugin::from_descriptor(
                descriptor,
                ModerationVariant::B,
                client.clone(),
            )?))
        });

        // The tag exists so persisted descriptors parse; the execution engine
        // for operator-supplied prompts is an external collaborator.
        registry.register(PluginType::CustomLlm, |_descriptor| {
            Err(PluginError::UnsupportedType("custom-llm".to_string()))
        });

        registry
    }

    /// Register (or override) the constructor for a type
    pub fn register<F>(&mut self, plugin_type: PluginType, constructor: F)
    where
        F: Fn(&PluginDescriptor) -> PluginOpResult<Arc<dyn ContentPlugin>> + Send + Sync + 'static,
    {
        self.constructors.insert(plugin_type, Box::new(constructor));
    }

    /// Instantiate a descriptor
    pub fn instantiate(&self, descriptor: &PluginDescriptor) -> PluginOpResult<Arc<dyn ContentPlugin>> {
        let constructor = self
            .constructors
            .get(&descriptor.plugin_type)
            .ok_or_else(|| PluginError::UnknownType(descriptor.plugin_type.to_string()))?;
        constructor(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_instantiate() {
        let registry = PluginRegistry::new(reqwest::Client::new());
        let desc = PluginDescriptor::new(
            "acme",
            "denylist",
            PluginType::Deny,
            10,
            json!({"keywords": ["x"]}),
        );
        let instance = registry.instantiate(&desc).unwrap();
        assert_eq!(instance.name(), "denylist");
        assert_eq!(instance.plugin_type(), PluginType::Deny);
    }

    #[test]
    fn custom_llm_is_unsupported_here() {
        let registry = PluginRegistry::new(reqwest::Client::new());
        let desc = PluginDescriptor::new("acme", "llm", PluginType::CustomLlm, 10, json!({}));
        assert!(matches!(
            registry.instantiate(&desc),
            Err(PluginError::UnsupportedType(_))
        ));
    }
}
