//! Keyword deny-list plugin
//!
//! Case-insensitive substring matching against a fixed keyword list, with an
//! optional word-boundary mode. Any hit blocks.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use mcpgate_protocol::{Content, RequestEnvelope};

use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
use crate::result::{PluginAction, PluginResult, Violation};

/// Typed config for the deny plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyPluginConfig {
    /// Keywords to deny
    pub keywords: Vec<String>,
    /// Match only at word boundaries (default: false)
    #[serde(default)]
    pub word_boundary: bool,
}

enum Matcher {
    /// Lowercased keyword for substring search
    Substring(String),
    /// Word-boundary regex built from the keyword
    Word(Regex),
}

/// Compiled deny-list instance
pub struct DenyPlugin {
    name: String,
    matchers: Vec<(String, Matcher)>,
    capabilities: PluginCapabilities,
}

impl DenyPlugin {
    /// Build from a descriptor
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> PluginOpResult<Self> {
        let config: DenyPluginConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;
        if config.keywords.is_empty() {
            return Err(PluginError::invalid_config(
                &descriptor.name,
                "keyword list must not be empty",
            ));
        }

        let mut matchers = Vec::with_capacity(config.keywords.len());
        for keyword in config.keywords {
            let matcher = if config.word_boundary {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(&keyword));
                let regex = Regex::new(&pattern)
                    .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;
                Matcher::Word(regex)
            } else {
                Matcher::Substring(keyword.to_lowercase())
            };
            matchers.push((keyword, matcher));
        }

        Ok(Self {
            name: descriptor.name.clone(),
            matchers,
            capabilities: PluginCapabilities::all_directions().blocking(),
        })
    }
}

#[async_trait]
impl ContentPlugin for DenyPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Deny
    }

    fn capabilities(&self) -> &PluginCapabilities {
        &self.capabilities
    }

    async fn apply(
        &self,
        _cx: &PluginContext,
        _envelope: &RequestEnvelope,
        content: &Content,
    ) -> PluginOpResult<PluginApplication> {
        let raw = content.raw();
        let lowered = raw.to_lowercase();
        let mut violations = Vec::new();

        for (keyword, matcher) in &self.matchers {
            let position = match matcher {
                Matcher::Substring(needle) => lowered.find(needle.as_str()),
                Matcher::Word(regex) => regex.find(raw).map(|m| m.start()),
            };
            if let Some(position) = position {
                violations.push(
                    Violation::new("keyword", "deny", "high")
                        .with_pattern(keyword)
                        .with_position(position),
                );
            }
        }

        if violations.is_empty() {
            return Ok((PluginResult::allow(), None));
        }

        let result = PluginResult {
            action: PluginAction::Block,
            reason: format!("denied keyword matched ({} hits)", violations.len()),
            modified: false,
            violations,
        };
        Ok((result, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(config: serde_json::Value) -> DenyPlugin {
        let desc = PluginDescriptor::new("acme", "denylist", PluginType::Deny, 10, config);
        DenyPlugin::from_descriptor(&desc).unwrap()
    }

    async fn apply(plugin: &DenyPlugin, text: &str) -> PluginResult {
        let cx = PluginContext::new("acme");
        let env = RequestEnvelope::new(
            "1",
            "tools/call",
            json!({}),
            mcpgate_protocol::TransportKind::Http,
        );
        plugin
            .apply(&cx, &env, &Content::text(text))
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn substring_match_is_case_insensitive() {
        let plugin = plugin(json!({"keywords": ["forbidden"]}));
        let result = apply(&plugin, "This is FORBIDDEN territory").await;
        assert_eq!(result.action, PluginAction::Block);
        assert_eq!(result.violations[0].category, "deny");
        assert_eq!(result.violations[0].position, Some(8));
    }

    #[tokio::test]
    async fn word_boundary_mode_ignores_substrings() {
        let plugin = plugin(json!({"keywords": ["cat"], "word_boundary": true}));
        assert_eq!(apply(&plugin, "concatenate").await.action, PluginAction::Allow);
        assert_eq!(apply(&plugin, "a cat sat").await.action, PluginAction::Block);
    }

    #[tokio::test]
    async fn multiple_hits_all_reported() {
        let plugin = plugin(json!({"keywords": ["alpha", "beta"]}));
        let result = apply(&plugin, "alpha and beta").await;
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn empty_keyword_list_is_rejected() {
        let desc = PluginDescriptor::new(
            "acme",
            "denylist",
            PluginType::Deny,
            10,
            json!({"keywords": []}),
        );
        assert!(DenyPlugin::from_descriptor(&desc).is_err());
    }
}
