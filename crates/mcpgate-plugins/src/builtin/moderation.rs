//! External moderation plugins
//!
//! Two classifier integrations sharing one HTTP path: the content goes out as
//! a single user turn, the response comes back as a safe/unsafe verdict plus
//! category, and the configured confidence threshold maps the verdict onto
//! block/warn/audit. Transport failures retry with jittered exponential
//! backoff; a final failure surfaces as an external error and the manager
//! resolves it per the descriptor's execution mode. Responses are never
//! cached; each call is independent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use mcpgate_protocol::{Content, RequestEnvelope};

use crate::descriptor::{PluginDescriptor, PluginType};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginApplication, PluginCapabilities, PluginContext};
use crate::result::{PluginAction, PluginResult, Violation};

/// Which classifier wire shape to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationVariant {
    /// Moderation-endpoint shape: `{"results":[{flagged, category_scores}]}`
    A,
    /// Chat-completion shape: first line `safe`/`unsafe`, second a category code
    B,
}

/// Typed config shared by both moderation variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Classifier endpoint URL
    pub endpoint: String,
    /// Bearer token for the classifier
    pub api_key: String,
    /// Model name forwarded to the classifier, when it wants one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Scores at or above this block; flagged content below it warns
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// Per-call timeout in milliseconds (default: 30000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries on transport failure (default: 2)
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Header carrying the tenant identity (default: `X-Gateway-Tenant`)
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

fn default_threshold() -> f64 {
    0.8
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    2
}

fn default_identity_header() -> String {
    "X-Gateway-Tenant".to_string()
}

/// Normalized category taxonomy
///
/// Provider categories collapse into this fixed set; anything unrecognized
/// maps to `other` with the provider tag preserved in the violation pattern.
fn normalize_category(provider: &str) -> &'static str {
    let tag = provider.to_ascii_lowercase();
    let tag = tag.trim();
    match tag {
        t if t.contains("hate") || t.contains("harass") || t == "s10" => "hate",
        t if t.contains("violen") || t.contains("graphic") || t == "s1" => "violence",
        t if t.contains("sexual") || t.contains("minor") || t == "s3" || t == "s4" || t == "s12" => {
            "sexual"
        }
        t if t.contains("self-harm") || t.contains("self_harm") || t.contains("suicide")
            || t == "s11" =>
        {
            "self-harm"
        }
        t if t.contains("illicit") || t.contains("weapon") || t.contains("drug")
            || t.contains("crime") || t == "s2" || t == "s9" =>
        {
            "illicit"
        }
        _ => "other",
    }
}

struct Verdict {
    unsafe_content: bool,
    category: String,
    confidence: f64,
}

/// External moderation plugin instance
pub struct ModerationPlugin {
    name: String,
    variant: ModerationVariant,
    config: ModerationConfig,
    client: reqwest::Client,
    capabilities: PluginCapabilities,
}

impl ModerationPlugin {
    /// Build from a descriptor; the HTTP client comes from the process
    /// context so connection pools are shared across instances
    pub fn from_descriptor(
        descriptor: &PluginDescriptor,
        variant: ModerationVariant,
        client: reqwest::Client,
    ) -> PluginOpResult<Self> {
        let config: ModerationConfig = serde_json::from_value(descriptor.config.clone())
            .map_err(|e| PluginError::invalid_config(&descriptor.name, e.to_string()))?;
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(PluginError::invalid_config(
                &descriptor.name,
                "confidence_threshold must be within [0.0, 1.0]",
            ));
        }

        Ok(Self {
            name: descriptor.name.clone(),
            variant,
            config,
            client,
            capabilities: PluginCapabilities::all_directions().blocking().external(),
        })
    }

    fn request_body(&self, content: &Content) -> Value {
        match self.variant {
            ModerationVariant::A => {
                let mut body = json!({"input": content.raw()});
                if let Some(model) = &self.config.model {
                    body["model"] = json!(model);
                }
                body
            }
            ModerationVariant::B => json!({
                "model": self.config.model.clone().unwrap_or_default(),
                "messages": [{"role": "user", "content": content.raw()}],
            }),
        }
    }

    fn parse_verdict(&self, body: &Value) -> PluginOpResult<Verdict> {
        match self.variant {
            ModerationVariant::A => {
                let result = body
                    .get("results")
                    .and_then(Value::as_array)
                    .and_then(|r| r.first())
                    .ok_or_else(|| {
                        PluginError::external(&self.name, "missing results array in response")
                    })?;
                let flagged = result
                    .get("flagged")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let (category, confidence) = result
                    .get("category_scores")
                    .and_then(Value::as_object)
                    .map(|scores| {
                        scores
                            .iter()
                            .filter_map(|(k, v)| v.as_f64().map(|s| (k.clone(), s)))
                            .max_by(|a, b| a.1.total_cmp(&b.1))
                            .unwrap_or(("other".to_string(), 0.0))
                    })
                    .unwrap_or(("other".to_string(), if flagged { 1.0 } else { 0.0 }));
                Ok(Verdict {
                    unsafe_content: flagged,
                    category,
                    confidence,
                })
            }
            ModerationVariant::B => {
                let text = body
                    .get("choices")
                    .and_then(Value::as_array)
                    .and_then(|c| c.first())
                    .and_then(|c| c.pointer("/message/content"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        PluginError::external(&self.name, "missing verdict text in response")
                    })?;
                let mut lines = text.lines();
                let verdict = lines.next().unwrap_or("").trim().to_ascii_lowercase();
                let category = lines.next().unwrap_or("").trim().to_string();
                Ok(Verdict {
                    unsafe_content: verdict == "unsafe",
                    category,
                    confidence: if verdict == "unsafe" { 1.0 } else { 0.0 },
                })
            }
        }
    }

    /// One classifier call with retries; transport failures and 5xx retry,
    /// anything else is final
    async fn call_classifier(&self, cx: &PluginContext, content: &Content) -> PluginOpResult<Value> {
        let body = self.request_body(content);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(attempt);
                debug!(plugin = %self.name, attempt, ?backoff, "retrying moderation call");
                tokio::time::sleep(backoff).await;
            }

            let response = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(&self.config.api_key)
                .header(self.config.identity_header.as_str(), cx.tenant_id.as_str())
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| PluginError::external(&self.name, e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = format!("classifier returned {}", resp.status());
                }
                Ok(resp) => {
                    return Err(PluginError::external(
                        &self.name,
                        format!("classifier returned {}", resp.status()),
                    ));
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(PluginError::external(&self.name, last_error))
    }
}

/// Jittered exponential backoff: 200ms base, doubling, 10% jitter
fn backoff_delay(attempt: u32) -> Duration {
    let base = 200u64.saturating_mul(1 << (attempt - 1).min(6));
    let jitter = 1.0 + (fastrand::f64() - 0.5) * 0.2;
    Duration::from_millis((base as f64 * jitter) as u64)
}

#[async_trait]
impl ContentPlugin for ModerationPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_type(&self) -> PluginType {
        match self.variant {
            ModerationVariant::A => PluginType::ExternalModerationA,
            ModerationVariant::B => PluginType::ExternalModerationB,
        }
    }

    fn capabilities(&self) -> &PluginCapabilities {
        &self.capabilities
    }

    async fn apply(
        &self,
        cx: &PluginContext,
        _envelope: &RequestEnvelope,
        content: &Content,
    ) -> PluginOpResult<PluginApplication> {
        let body = self.call_classifier(cx, content).await?;
        let verdict = self.parse_verdict(&body)?;

        if !verdict.unsafe_content {
            return Ok((PluginResult::allow(), None));
        }

        let normalized = normalize_category(&verdict.category);
        let violation = Violation::new("moderation", normalized, "high")
            .with_confidence(verdict.confidence)
            .with_pattern(verdict.category.clone());

        let result = if verdict.confidence >= self.config.confidence_threshold {
            PluginResult::block(format!("moderation flagged content as {normalized}"))
        } else {
            warn!(plugin = %self.name, category = normalized, confidence = verdict.confidence,
                  "moderation flagged below threshold");
            PluginResult::warn(format!(
                "moderation flagged content as {normalized} below threshold"
            ))
        };
        Ok((result.with_violations(vec![violation]), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(endpoint: &str, extra: Value) -> PluginDescriptor {
        let mut config = json!({
            "endpoint": endpoint,
            "api_key": "test-key",
            "max_retries": 1,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut config, extra) {
            base.extend(extra);
        }
        PluginDescriptor::new("acme", "moderation", PluginType::ExternalModerationA, 10, config)
    }

    async fn apply(plugin: &ModerationPlugin) -> PluginOpResult<PluginApplication> {
        let cx = PluginContext::new("acme");
        let env = RequestEnvelope::new(
            "1",
            "tools/call",
            json!({}),
            mcpgate_protocol::TransportKind::Http,
        );
        plugin.apply(&cx, &env, &Content::text("some content")).await
    }

    #[tokio::test]
    async fn variant_a_blocks_above_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/moderate"))
            .and(header("X-Gateway-Tenant", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "flagged": true,
                    "category_scores": {"hate_speech": 0.93, "violence": 0.12},
                }]
            })))
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&format!("{}/moderate", server.uri()), json!({})),
            ModerationVariant::A,
            reqwest::Client::new(),
        )
        .unwrap();

        let (result, _) = apply(&plugin).await.unwrap();
        assert_eq!(result.action, PluginAction::Block);
        assert_eq!(result.violations[0].category, "hate");
        assert!((result.violations[0].confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn variant_a_warns_below_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "flagged": true,
                    "category_scores": {"violence": 0.4},
                }]
            })))
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&server.uri(), json!({"confidence_threshold": 0.8})),
            ModerationVariant::A,
            reqwest::Client::new(),
        )
        .unwrap();

        let (result, _) = apply(&plugin).await.unwrap();
        assert_eq!(result.action, PluginAction::Warn);
        assert_eq!(result.violations[0].category, "violence");
    }

    #[tokio::test]
    async fn variant_b_parses_verdict_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "unsafe\nS10"}}]
            })))
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&server.uri(), json!({})),
            ModerationVariant::B,
            reqwest::Client::new(),
        )
        .unwrap();

        let (result, _) = apply(&plugin).await.unwrap();
        assert_eq!(result.action, PluginAction::Block);
        assert_eq!(result.violations[0].category, "hate");
        assert_eq!(result.violations[0].pattern.as_deref(), Some("S10"));
    }

    #[tokio::test]
    async fn safe_content_is_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"flagged": false, "category_scores": {}}]
            })))
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&server.uri(), json!({})),
            ModerationVariant::A,
            reqwest::Client::new(),
        )
        .unwrap();

        let (result, content) = apply(&plugin).await.unwrap();
        assert_eq!(result.action, PluginAction::Allow);
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn server_errors_retry_then_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2) // initial attempt + one retry
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&server.uri(), json!({"max_retries": 1})),
            ModerationVariant::A,
            reqwest::Client::new(),
        )
        .unwrap();

        assert!(matches!(
            apply(&plugin).await,
            Err(PluginError::External { .. })
        ));
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let plugin = ModerationPlugin::from_descriptor(
            &descriptor(&server.uri(), json!({"max_retries": 3})),
            ModerationVariant::A,
            reqwest::Client::new(),
        )
        .unwrap();

        assert!(apply(&plugin).await.is_err());
    }

    #[test]
    fn category_normalization() {
        assert_eq!(normalize_category("hate_speech"), "hate");
        assert_eq!(normalize_category("S10"), "hate");
        assert_eq!(normalize_category("graphic_violence"), "violence");
        assert_eq!(normalize_category("self-harm/intent"), "self-harm");
        assert_eq!(normalize_category("weapons"), "illicit");
        assert_eq!(normalize_category("unknown_tag"), "other");
    }
}
