//! Per-tenant plugin chains
//!
//! The manager holds the descriptor source of truth behind a mutex and
//! publishes compiled chains through `ArcSwap`: readers take a snapshot
//! pointer and are never blocked by a reload. A reload builds the whole new
//! chain first, then swaps it in; in-flight applications keep the old
//! snapshot until they finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

use mcpgate_protocol::{Content, Direction, RequestEnvelope};

use crate::config_io::PluginConfigDocument;
use crate::descriptor::{ExecutionMode, PluginDescriptor};
use crate::error::{PluginError, PluginResult as PluginOpResult};
use crate::plugin::{ContentPlugin, PluginContext};
use crate::registry::PluginRegistry;
use crate::result::{PluginAction, PluginResult, Violation};

/// Per-plugin application timeouts
#[derive(Debug, Clone)]
pub struct PluginTimeouts {
    /// Budget for local plugins
    pub local: Duration,
    /// Budget for plugins that reach an external service
    pub external: Duration,
}

impl Default for PluginTimeouts {
    fn default() -> Self {
        Self {
            local: Duration::from_secs(5),
            external: Duration::from_secs(30),
        }
    }
}

struct ChainEntry {
    descriptor: PluginDescriptor,
    instance: Arc<dyn ContentPlugin>,
}

type Chain = Vec<ChainEntry>;

/// Aggregated outcome of one chain application
#[derive(Debug)]
pub struct ChainOutcome {
    /// Strongest action among invoked plugins
    pub action: PluginAction,
    /// Accumulated reasons, "; "-separated
    pub reason: String,
    /// Whether any plugin modified the content
    pub modified: bool,
    /// All violations, in invocation order
    pub violations: Vec<Violation>,
    /// The content after the chain (modified or the original)
    pub content: Content,
    /// Names of plugins that actually ran
    pub invoked: Vec<String>,
    /// The enforcing plugin that blocked, if any
    pub blocked_by: Option<String>,
    /// Whether the blocking contribution came from a timeout
    pub timed_out: bool,
    /// Per-plugin wall time, for metrics
    pub timings: Vec<(String, Duration)>,
}

impl ChainOutcome {
    fn pass_through(content: Content) -> Self {
        Self {
            action: PluginAction::Allow,
            reason: String::new(),
            modified: false,
            violations: Vec::new(),
            content,
            invoked: Vec::new(),
            blocked_by: None,
            timed_out: false,
            timings: Vec::new(),
        }
    }

    /// Whether the chain rejected the request
    pub fn is_blocked(&self) -> bool {
        self.action == PluginAction::Block
    }
}

/// Ordered per-tenant plugin chains with copy-on-replace reloads
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    descriptors: Mutex<HashMap<String, Vec<PluginDescriptor>>>,
    chains: DashMap<String, Arc<ArcSwap<Chain>>>,
    timeouts: PluginTimeouts,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("tenants", &self.chains.len())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl PluginManager {
    /// Manager over a registry with the given timeouts
    pub fn new(registry: Arc<PluginRegistry>, timeouts: PluginTimeouts) -> Self {
        Self {
            registry,
            descriptors: Mutex::new(HashMap::new()),
            chains: DashMap::new(),
            timeouts,
        }
    }

    /// Add or replace one descriptor and republish the tenant's chain
    pub fn upsert(&self, descriptor: PluginDescriptor) -> PluginOpResult<()> {
        let tenant = descriptor.tenant_id.clone();
        let snapshot = {
            let mut store = self.descriptors.lock();
            let list = store.entry(tenant.clone()).or_default();
            if let Some(existing) = list.iter_mut().find(|d| d.name == descriptor.name) {
                *existing = descriptor;
            } else {
                list.push(descriptor);
            }
            list.clone()
        };
        self.publish(&tenant, &snapshot)
    }

    /// Remove a descriptor and republish
    pub fn remove(&self, tenant: &str, name: &str) -> PluginOpResult<()> {
        let snapshot = {
            let mut store = self.descriptors.lock();
            let list = store
                .get_mut(tenant)
                .ok_or_else(|| PluginError::NotFound {
                    tenant: tenant.to_string(),
                    name: name.to_string(),
                })?;
            let before = list.len();
            list.retain(|d| d.name != name);
            if list.len() == before {
                return Err(PluginError::NotFound {
                    tenant: tenant.to_string(),
                    name: name.to_string(),
                });
            }
            list.clone()
        };
        self.publish(tenant, &snapshot)
    }

    /// Descriptors for a tenant in chain order
    pub fn list(&self, tenant: &str) -> Vec<PluginDescriptor> {
        let mut list = self
            .descriptors
            .lock()
            .get(tenant)
            .cloned()
            .unwrap_or_default();
        list.sort_by_key(PluginDescriptor::order_key);
        list
    }

    /// Export a tenant's chain as a config document
    pub fn export(&self, tenant: &str) -> PluginConfigDocument {
        PluginConfigDocument::from_descriptors(tenant, self.list(tenant))
    }

    /// Import a config document, replacing the tenant's whole chain
    pub fn import(&self, document: PluginConfigDocument) -> PluginOpResult<()> {
        let tenant = document.tenant_id.clone();
        let descriptors = document.into_descriptors()?;
        {
            let mut store = self.descriptors.lock();
            store.insert(tenant.clone(), descriptors.clone());
        }
        self.publish(&tenant, &descriptors)
    }

    /// Build and atomically publish a tenant's chain
    ///
    /// Disabled descriptors are excluded at build time, so skipping them at
    /// request time costs nothing.
    fn publish(&self, tenant: &str, descriptors: &[PluginDescriptor]) -> PluginOpResult<()> {
        let mut active: Vec<&PluginDescriptor> = descriptors
            .iter()
            .filter(|d| d.enabled && d.mode != ExecutionMode::Disabled)
            .collect();
        active.sort_by_key(|d| d.order_key());

        let mut chain = Vec::with_capacity(active.len());
        for descriptor in active {
            let instance = self.registry.instantiate(descriptor)?;
            chain.push(ChainEntry {
                descriptor: descriptor.clone(),
                instance,
            });
        }

        debug!(tenant_id = %tenant, plugins = chain.len(), "publishing plugin chain");
        let chain = Arc::new(chain);
        match self.chains.get(tenant) {
            Some(slot) => slot.store(chain),
            None => {
                self.chains
                    .insert(tenant.to_string(), Arc::new(ArcSwap::new(chain)));
            }
        }
        Ok(())
    }

    fn snapshot(&self, tenant: &str) -> Option<Arc<Chain>> {
        self.chains.get(tenant).map(|slot| slot.load_full())
    }

    /// Run the tenant's chain at one direction point
    ///
    /// Plugins whose capabilities exclude the direction or the content type
    /// are skipped. An enforcing `block` stops the chain; everything else
    /// continues with the (possibly modified) content. Plugin errors are
    /// resolved by execution mode: enforcing surfaces the error, permissive
    /// allows, audit-only contributes an audit.
    pub async fn apply(
        &self,
        cx: &PluginContext,
        envelope: &RequestEnvelope,
        content: Content,
        direction: Direction,
    ) -> PluginOpResult<ChainOutcome> {
        let Some(chain) = self.snapshot(&cx.tenant_id) else {
            return Ok(ChainOutcome::pass_through(content));
        };
        if chain.is_empty() {
            return Ok(ChainOutcome::pass_through(content));
        }

        let mut outcome = ChainOutcome::pass_through(content);
        let mut merged = PluginResult::allow();

        for entry in chain.iter() {
            let capabilities = entry.instance.capabilities();
            if !capabilities.supports(direction, outcome.content.content_type()) {
                continue;
            }

            let name = entry.descriptor.name.clone();
            let mode = entry.descriptor.mode;
            let budget = if capabilities.external {
                self.timeouts.external
            } else {
                self.timeouts.local
            };

            let started = Instant::now();
            let applied =
                tokio::time::timeout(budget, entry.instance.apply(cx, envelope, &outcome.content))
                    .await;
            outcome.timings.push((name.clone(), started.elapsed()));
            outcome.invoked.push(name.clone());

            let contribution = match applied {
                Err(_) => {
                    warn!(plugin = %name, mode = %mode, "plugin timed out");
                    match mode {
                        ExecutionMode::Enforcing => {
                            outcome.timed_out = true;
                            PluginResult::block("plugin timeout")
                        }
                        _ => PluginResult::audit("plugin timeout"),
                    }
                }
                Ok(Err(err)) => match mode {
                    ExecutionMode::Enforcing => return Err(err),
                    ExecutionMode::Permissive => {
                        warn!(plugin = %name, error = %err, "permissive plugin failed, allowing");
                        PluginResult::allow()
                    }
                    _ => PluginResult::audit(err.to_string()),
                },
                Ok(Ok((mut result, new_content))) => {
                    if let Some(new_content) = new_content
                        && capabilities.modifies
                    {
                        outcome.content = new_content;
                    }
                    match mode {
                        ExecutionMode::Permissive if result.action == PluginAction::Block => {
                            result.action = PluginAction::Audit;
                        }
                        ExecutionMode::AuditOnly => result.action = PluginAction::Audit,
                        _ => {}
                    }
                    result
                }
            };

            // Post-modulation, only enforcing plugins can still say block.
            let blocks_chain = contribution.action == PluginAction::Block;
            merged.merge(contribution);
            if blocks_chain {
                outcome.blocked_by = Some(name);
                break;
            }
        }

        outcome.action = merged.action;
        outcome.reason = merged.reason;
        outcome.modified = merged.modified;
        outcome.violations = merged.violations;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PluginType;
    use crate::plugin::{PluginApplication, PluginCapabilities};
    use async_trait::async_trait;
    use mcpgate_protocol::TransportKind;
    use serde_json::json;

    /// Scriptable test plugin registered under the custom-llm tag
    struct ScriptedPlugin {
        name: String,
        capabilities: PluginCapabilities,
        action: PluginAction,
        delay: Duration,
        rewrite: Option<String>,
    }

    #[async_trait]
    impl ContentPlugin for ScriptedPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn plugin_type(&self) -> PluginType {
            PluginType::CustomLlm
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
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = PluginResult {
                action: self.action,
                reason: format!("{} fired", self.name),
                modified: self.rewrite.is_some(),
                violations: vec![Violation::new("scripted", "test", "low")],
            };
            let content = self.rewrite.as_ref().map(|r| content.with_raw(r.clone()));
            Ok((result, content))
        }
    }

    fn scripted_registry() -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new(reqwest::Client::new());
        registry.register(PluginType::CustomLlm, |descriptor| {
            let action = match descriptor.config["action"].as_str() {
                Some("block") => PluginAction::Block,
                Some("warn") => PluginAction::Warn,
                Some("audit") => PluginAction::Audit,
                _ => PluginAction::Allow,
            };
            let delay = Duration::from_millis(descriptor.config["delay_ms"].as_u64().unwrap_or(0));
            let rewrite = descriptor.config["rewrite"].as_str().map(String::from);
            let mut capabilities = PluginCapabilities::all_directions();
            capabilities.modifies = rewrite.is_some();
            capabilities.blocks = true;
            Ok(Arc::new(ScriptedPlugin {
                name: descriptor.name.clone(),
                capabilities,
                action,
                delay,
                rewrite,
            }))
        });
        Arc::new(registry)
    }

    fn descriptor(name: &str, priority: i64, config: serde_json::Value) -> PluginDescriptor {
        PluginDescriptor::new("acme", name, PluginType::CustomLlm, priority, config)
    }

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::new("1", "tools/call", json!({}), TransportKind::Http)
    }

    async fn run(manager: &PluginManager) -> ChainOutcome {
        manager
            .apply(
                &PluginContext::new("acme"),
                &envelope(),
                Content::text("hello"),
                Direction::Inbound,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Allow);
        assert!(outcome.invoked.is_empty());
    }

    #[tokio::test]
    async fn merge_takes_strongest_action() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(descriptor("a-audit", 10, json!({"action": "audit"})))
            .unwrap();
        manager
            .upsert(descriptor("b-warn", 20, json!({"action": "warn"})))
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Warn);
        assert_eq!(outcome.invoked, vec!["a-audit", "b-warn"]);
        assert_eq!(outcome.violations.len(), 2);
        assert_eq!(outcome.reason, "a-audit fired; b-warn fired");
    }

    #[tokio::test]
    async fn enforcing_block_short_circuits() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(descriptor("first", 10, json!({"action": "block"})))
            .unwrap();
        manager
            .upsert(descriptor("second", 20, json!({"action": "warn"})))
            .unwrap();
        let outcome = run(&manager).await;
        assert!(outcome.is_blocked());
        assert_eq!(outcome.blocked_by.as_deref(), Some("first"));
        assert_eq!(outcome.invoked, vec!["first"]);
    }

    #[tokio::test]
    async fn permissive_block_downgrades_to_audit() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(
                descriptor("soft", 10, json!({"action": "block"}))
                    .with_mode(ExecutionMode::Permissive),
            )
            .unwrap();
        manager
            .upsert(descriptor("after", 20, json!({"action": "allow"})))
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Audit);
        // The chain continued past the downgraded block.
        assert_eq!(outcome.invoked, vec!["soft", "after"]);
    }

    #[tokio::test]
    async fn disabled_plugins_are_not_in_the_chain() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(
                descriptor("off", 10, json!({"action": "block"}))
                    .with_mode(ExecutionMode::Disabled),
            )
            .unwrap();
        manager
            .upsert(descriptor("gone", 15, json!({"action": "block"})).with_enabled(false))
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Allow);
        assert!(outcome.invoked.is_empty());
    }

    #[tokio::test]
    async fn timeout_blocks_in_enforcing_mode() {
        let manager = PluginManager::new(
            scripted_registry(),
            PluginTimeouts {
                local: Duration::from_millis(20),
                external: Duration::from_millis(20),
            },
        );
        manager
            .upsert(descriptor("slow", 10, json!({"action": "allow", "delay_ms": 200})))
            .unwrap();
        let outcome = run(&manager).await;
        assert!(outcome.is_blocked());
        assert!(outcome.timed_out);
        assert_eq!(outcome.reason, "plugin timeout");
    }

    #[tokio::test]
    async fn timeout_audits_in_permissive_mode() {
        let manager = PluginManager::new(
            scripted_registry(),
            PluginTimeouts {
                local: Duration::from_millis(20),
                external: Duration::from_millis(20),
            },
        );
        manager
            .upsert(
                descriptor("slow", 10, json!({"action": "allow", "delay_ms": 200}))
                    .with_mode(ExecutionMode::Permissive),
            )
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Audit);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.reason, "plugin timeout");
    }

    #[tokio::test]
    async fn modified_content_flows_to_later_plugins() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(descriptor(
                "rewriter",
                10,
                json!({"action": "warn", "rewrite": "rewritten"}),
            ))
            .unwrap();
        let outcome = run(&manager).await;
        assert!(outcome.modified);
        assert_eq!(outcome.content.raw(), "rewritten");
    }

    #[tokio::test]
    async fn priority_orders_the_chain_with_created_at_tiebreak() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(descriptor("late", 20, json!({"action": "audit"})))
            .unwrap();
        manager
            .upsert(descriptor("early", 10, json!({"action": "audit"})))
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.invoked, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn reload_swaps_chain_atomically_for_new_requests() {
        let manager = PluginManager::new(scripted_registry(), PluginTimeouts::default());
        manager
            .upsert(descriptor("guard", 10, json!({"action": "block"})))
            .unwrap();
        assert!(run(&manager).await.is_blocked());

        manager
            .upsert(
                descriptor("guard", 10, json!({"action": "block"}))
                    .with_mode(ExecutionMode::Permissive),
            )
            .unwrap();
        let outcome = run(&manager).await;
        assert_eq!(outcome.action, PluginAction::Audit);

        manager.remove("acme", "guard").unwrap();
        assert_eq!(run(&manager).await.action, PluginAction::Allow);
    }
}
