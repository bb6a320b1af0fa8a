//! Pattern-matching plugin
//!
//! Patterns are compiled once at construction. Each rule carries its own
//! action and an optional replacement; rules evaluate in config order and the
//! first blocking match short-circuits the rest of the plugin.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use mcpgate_protocol::{Content, RequestEnvelope};

use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
use crate::result::{PluginAction, PluginResult, Violation};

/// Typed config for the regex plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexPluginConfig {
    /// Rules, evaluated in order
    pub patterns: Vec<RegexRule>,
}

/// One pattern rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRule {
    /// Regular expression, Rust `regex` syntax
    pub pattern: String,
    /// Action on match (default: block)
    #[serde(default = "default_action")]
    pub action: PluginAction,
    /// Replacement text; when set, matches are substituted and the result is
    /// marked modified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Violation category (default: `pattern`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn default_action() -> PluginAction {
    PluginAction::Block
}

struct CompiledRule {
    regex: Regex,
    action: PluginAction,
    replacement: Option<String>,
    category: String,
}

/// Compiled regex plugin instance
pub struct RegexPlugin {
    name: String,
    rules: Vec<CompiledRule>,
    capabilities: PluginCapabilities,
}

impl RegexPlugin {
    /// Build from a descriptor, compiling every pattern
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> PluginOpResult<Self> {
        let config: RegexPluginConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;

        let mut rules = Vec::with_capacity(config.patterns.len());
        let mut modifies = false;
        let mut blocks = false;
        for rule in config.patterns {
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                PluginError::invalid_config(
                    &descriptor.name,
                    format!("pattern '{}': {e}", rule.pattern),
                )
            })?;
            modifies |= rule.replacement.is_some();
            blocks |= rule.action == PluginAction::Block;
            rules.push(CompiledRule {
                regex,
                action: rule.action,
                replacement: rule.replacement,
                category: rule.category.unwrap_or_else(|| "pattern".to_string()),
            });
        }

        let mut capabilities = PluginCapabilities::all_directions();
        capabilities.modifies = modifies;
        capabilities.blocks = blocks;

        Ok(Self {
            name: descriptor.name.clone(),
            rules,
            capabilities,
        })
    }
}

fn severity_for(action: PluginAction) -> &'static str {
    match action {
        PluginAction::Block => "high",
        PluginAction::Warn => "medium",
        PluginAction::Audit | PluginAction::Allow => "low",
    }
}

#[async_trait]
impl ContentPlugin for RegexPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Regex
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
        let mut result = PluginResult::allow();
        let mut working = content.raw().to_string();
        let mut changed = false;

        for rule in &self.rules {
            // Violations are located against the original text; replacements
            // run against the working copy.
            let matches: Vec<(usize, &str)> = rule
                .regex
                .find_iter(content.raw())
                .map(|m| (m.start(), m.as_str()))
                .collect();
            if matches.is_empty() {
                continue;
            }

            for (position, matched) in &matches {
                result.violations.push(
                    Violation::new("pattern_match", &rule.category, severity_for(rule.action))
                        .with_pattern(*matched)
                        .with_position(*position),
                );
            }

            if rule.action == PluginAction::Block {
                result.action = PluginAction::Block;
                result.reason = format!("pattern '{}' matched", rule.regex.as_str());
                break;
            }

            result.action = result.action.max(rule.action);
            if let Some(replacement) = &rule.replacement {
                working = rule
                    .regex
                    .replace_all(&working, replacement.as_str())
                    .into_owned();
                changed = true;
            }
        }

        if changed {
            result.modified = true;
            let modified = content.with_raw(working);
            Ok((result, Some(modified)))
        } else {
            Ok((result, None))
        }
    }
}
