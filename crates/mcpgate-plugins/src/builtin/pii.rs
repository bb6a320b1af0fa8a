//! PII detection plugin
//!
//! Structured detectors over a fixed taxonomy: emails, phone numbers,
//! credit-card-like digit runs validated by Luhn, and national-id formats per
//! configured locale. Detected spans are either redacted in place (the
//! default) or block the request.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use mcpgate_protocol::{Content, RequestEnvelope};

use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
use crate::result::{PluginAction, PluginResult, Violation};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    // International or national formats, 8-15 digits with common separators.
    Regex::new(r"\+?\d[\d\s().-]{6,18}\d").expect("phone pattern")
});

static CARD_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    // 13-19 digit runs allowing space/dash separators; validated by Luhn.
    Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("card pattern")
});

static US_SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"));

static UK_NINO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-CEGHJ-PR-TW-Z]{2}\s?\d{2}\s?\d{2}\s?\d{2}\s?[A-D]\b").expect("nino pattern")
});

/// What to do with detected PII
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiAction {
    /// Substitute `[REDACTED:<kind>]` for each span and mark modified
    #[default]
    Redact,
    /// Block the request
    Block,
}

/// Per-detector toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiDetectors {
    /// Email addresses
    #[serde(default = "enabled")]
    pub email: bool,
    /// Phone numbers
    #[serde(default = "enabled")]
    pub phone: bool,
    /// Credit-card-like digit runs (Luhn-validated)
    #[serde(default = "enabled")]
    pub credit_card: bool,
    /// National-id formats for the configured locale
    #[serde(default)]
    pub national_id: bool,
}

fn enabled() -> bool {
    true
}

impl Default for PiiDetectors {
    fn default() -> Self {
        Self {
            email: true,
            phone: true,
            credit_card: true,
            national_id: false,
        }
    }
}

/// Typed config for the PII plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiPluginConfig {
    /// Detector toggles
    #[serde(default)]
    pub detectors: PiiDetectors,
    /// National-id locale: `us` (SSN) or `uk` (NINO)
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Redact or block
    #[serde(default)]
    pub action: PiiAction,
}

fn default_locale() -> String {
    "us".to_string()
}

/// PII plugin instance
pub struct PiiPlugin {
    name: String,
    config: PiiPluginConfig,
    capabilities: PluginCapabilities,
}

#[derive(Debug)]
struct Detection {
    start: usize,
    end: usize,
    kind: &'static str,
}

impl PiiPlugin {
    /// Build from a descriptor
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> PluginOpResult<Self> {
        let config: PiiPluginConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;

        if config.detectors.national_id && !matches!(config.locale.as_str(), "us" | "uk") {
            return Err(PluginError::invalid_config(
                &descriptor.name,
                format!("unsupported national-id locale: {}", config.locale),
            ));
        }

        let mut capabilities = PluginCapabilities::all_directions();
        capabilities.modifies = config.action == PiiAction::Redact;
        capabilities.blocks = config.action == PiiAction::Block;

        Ok(Self {
            name: descriptor.name.clone(),
            config,
            capabilities,
        })
    }

    fn detect(&self, raw: &str) -> Vec<Detection> {
        let mut detections = Vec::new();
        let detectors = &self.config.detectors;

        if detectors.email {
            for m in EMAIL.find_iter(raw) {
                detections.push(Detection {
                    start: m.start(),
                    end: m.end(),
                    kind: "email",
                });
            }
        }
        if detectors.credit_card {
            for m in CARD_CANDIDATE.find_iter(raw) {
                if luhn_valid(m.as_str()) {
                    detections.push(Detection {
                        start: m.start(),
                        end: m.end(),
                        kind: "credit_card",
                    });
                }
            }
        }
        if detectors.national_id {
            let regex: &Regex = match self.config.locale.as_str() {
                "uk" => &UK_NINO,
                _ => &US_SSN,
            };
            for m in regex.find_iter(raw) {
                detections.push(Detection {
                    start: m.start(),
                    end: m.end(),
                    kind: "national_id",
                });
            }
        }
        if detectors.phone {
            for m in PHONE.find_iter(raw) {
                // Card numbers and SSNs also look like digit runs; prefer the
                // more specific detector for overlapping spans.
                let overlaps = detections
                    .iter()
                    .any(|d| m.start() < d.end && d.start < m.end());
                if !overlaps {
                    detections.push(Detection {
                        start: m.start(),
                        end: m.end(),
                        kind: "phone",
                    });
                }
            }
        }

        detections.sort_by_key(|d| d.start);
        detections
    }
}

/// Luhn checksum over the digits of a candidate span
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[async_trait]
impl ContentPlugin for PiiPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Pii
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
        let detections = self.detect(raw);
        if detections.is_empty() {
            return Ok((PluginResult::allow(), None));
        }

        let violations: Vec<Violation> = detections
            .iter()
            .map(|d| {
                Violation::new("pii", d.kind, "high")
                    .with_confidence(0.95)
                    .with_position(d.start)
            })
            .collect();

        match self.config.action {
            PiiAction::Block => {
                let result = PluginResult::block(format!(
                    "pii detected ({} spans)",
                    detections.len()
                ))
                .with_violations(violations);
                Ok((result, None))
            }
            PiiAction::Redact => {
                let mut redacted = String::with_capacity(raw.len());
                let mut cursor = 0;
                for d in &detections {
                    redacted.push_str(&raw[cursor..d.start]);
                    redacted.push_str(&format!("[REDACTED:{}]", d.kind));
                    cursor = d.end;
                }
                redacted.push_str(&raw[cursor..]);

                let result = PluginResult {
                    action: PluginAction::Warn,
                    reason: format!("pii redacted ({} spans)", detections.len()),
                    modified: true,
                    violations,
                };
                Ok((result, Some(content.with_raw(redacted))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(config: serde_json::Value) -> PiiPlugin {
        let desc = PluginDescriptor::new("acme", "pii-guard", PluginType::Pii, 10, config);
        PiiPlugin::from_descriptor(&desc).unwrap()
    }

    async fn apply(plugin: &PiiPlugin, text: &str) -> PluginApplication {
        let cx = PluginContext::new("acme");
        let env = RequestEnvelope::new(
            "1",
            "tools/call",
            json!({}),
            mcpgate_protocol::TransportKind::Http,
        );
        plugin.apply(&cx, &env, &Content::text(text)).await.unwrap()
    }

    #[test]
    fn luhn_accepts_valid_rejects_invalid() {
        assert!(luhn_valid("4539 1488 0343 6467"));
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("1234"));
    }

    #[tokio::test]
    async fn email_is_redacted() {
        let plugin = plugin(json!({}));
        let (result, content) = apply(&plugin, "contact jane.doe@example.com today").await;
        assert_eq!(result.action, PluginAction::Warn);
        assert!(result.modified);
        assert_eq!(content.unwrap().raw(), "contact [REDACTED:email] today");
        assert_eq!(result.violations[0].category, "email");
    }

    #[tokio::test]
    async fn card_number_requires_luhn() {
        let plugin = plugin(json!({"detectors": {"phone": false}}));
        let (result, _) = apply(&plugin, "pay with 4539 1488 0343 6467 now").await;
        assert_eq!(result.violations[0].category, "credit_card");

        let (result, content) = apply(&plugin, "order 4539 1488 0343 6468 is fine").await;
        assert!(result.violations.is_empty());
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn block_mode_blocks() {
        let plugin = plugin(json!({"action": "block"}));
        let (result, content) = apply(&plugin, "ssn mail: a@b.io").await;
        assert_eq!(result.action, PluginAction::Block);
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn national_id_follows_locale() {
        let us = plugin(json!({"detectors": {"national_id": true, "phone": false}}));
        let (result, _) = apply(&us, "ssn 536-90-4399 on file").await;
        assert!(result.violations.iter().any(|v| v.category == "national_id"));

        let uk = plugin(json!({
            "detectors": {"national_id": true, "phone": false},
            "locale": "uk"
        }));
        let (result, _) = apply(&uk, "nino AB 12 34 56 C registered").await;
        assert!(result.violations.iter().any(|v| v.category == "national_id"));
    }

    #[test]
    fn unknown_locale_is_rejected() {
        let desc = PluginDescriptor::new(
            "acme",
            "pii-guard",
            PluginType::Pii,
            10,
            json!({"detectors": {"national_id": true}, "locale": "atlantis"}),
        );
        assert!(PiiPlugin::from_descriptor(&desc).is_err());
    }
}
