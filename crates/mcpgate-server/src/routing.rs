//! Tenant routing tables
//!
//! Each tenant resolves a method (and for `tools/call`, the tool name) to a
//! backend target within its own namespace. Rules are matched most-specific
//! first: exact tool, exact method, prefix, then the catch-all. Rules under
//! the `*` tenant apply to every tenant that has no match of its own.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One routing rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Tenant the rule belongs to; `*` applies to all tenants
    pub tenant: String,
    /// Method matcher: exact (`tools/list`), prefix (`tools/*`), tool
    /// (`tool:echo`, matching `tools/call` with that tool name), or `*`
    pub method: String,
    /// Backend target id
    pub target: String,
}

impl RouteRule {
    fn specificity(&self) -> u8 {
        if let Some(rest) = self.method.strip_prefix("tool:") {
            let _ = rest;
            return 0;
        }
        if self.method == "*" {
            return 3;
        }
        if self.method.ends_with("/*") {
            return 2;
        }
        1
    }

    fn matches(&self, method: &str, tool: Option<&str>) -> bool {
        if let Some(name) = self.method.strip_prefix("tool:") {
            return method == "tools/call" && tool == Some(name);
        }
        if self.method == "*" {
            return true;
        }
        if let Some(prefix) = self.method.strip_suffix("/*") {
            return method.starts_with(prefix)
                && method[prefix.len()..].starts_with('/');
        }
        self.method == method
    }
}

/// Per-tenant routing table
#[derive(Debug, Default)]
pub struct RoutingTable {
    rules: DashMap<String, Vec<RouteRule>>,
}

impl RoutingTable {
    /// Table from config rules
    pub fn new(rules: Vec<RouteRule>) -> Self {
        let table = Self::default();
        for rule in rules {
            table.add(rule);
        }
        table
    }

    /// Add one rule, keeping each tenant's rules ordered by specificity
    pub fn add(&self, rule: RouteRule) {
        let mut entry = self.rules.entry(rule.tenant.clone()).or_default();
        entry.push(rule);
        entry.sort_by_key(RouteRule::specificity);
    }

    /// Resolve a method within a tenant's namespace
    ///
    /// `params` supplies the tool name for `tools/call` routing.
    pub fn resolve(&self, tenant: &str, method: &str, params: &Value) -> Option<String> {
        let tool = params.get("name").and_then(Value::as_str);
        self.resolve_in(tenant, method, tool)
            .or_else(|| self.resolve_in("*", method, tool))
    }

    fn resolve_in(&self, tenant: &str, method: &str, tool: Option<&str>) -> Option<String> {
        let rules = self.rules.get(tenant)?;
        rules
            .iter()
            .find(|rule| rule.matches(method, tool))
            .map(|rule| rule.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(tenant: &str, method: &str, target: &str) -> RouteRule {
        RouteRule {
            tenant: tenant.to_string(),
            method: method.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn exact_beats_prefix_beats_catchall() {
        let table = RoutingTable::new(vec![
            rule("acme", "*", "default"),
            rule("acme", "tools/*", "tools"),
            rule("acme", "tools/list", "listing"),
        ]);
        assert_eq!(
            table.resolve("acme", "tools/list", &json!({})),
            Some("listing".to_string())
        );
        assert_eq!(
            table.resolve("acme", "tools/call", &json!({})),
            Some("tools".to_string())
        );
        assert_eq!(
            table.resolve("acme", "prompts/list", &json!({})),
            Some("default".to_string())
        );
    }

    #[test]
    fn tool_rules_bind_tightest() {
        let table = RoutingTable::new(vec![
            rule("acme", "tools/*", "tools"),
            rule("acme", "tool:search", "search-backend"),
        ]);
        assert_eq!(
            table.resolve("acme", "tools/call", &json!({"name": "search"})),
            Some("search-backend".to_string())
        );
        assert_eq!(
            table.resolve("acme", "tools/call", &json!({"name": "other"})),
            Some("tools".to_string())
        );
    }

    #[test]
    fn wildcard_tenant_is_the_fallback() {
        let table = RoutingTable::new(vec![
            rule("*", "*", "shared"),
            rule("acme", "tools/*", "private"),
        ]);
        assert_eq!(
            table.resolve("acme", "tools/list", &json!({})),
            Some("private".to_string())
        );
        assert_eq!(
            table.resolve("globex", "tools/list", &json!({})),
            Some("shared".to_string())
        );
        assert_eq!(
            table.resolve("acme", "prompts/list", &json!({})),
            Some("shared".to_string())
        );
    }

    #[test]
    fn no_rule_is_none() {
        let table = RoutingTable::new(vec![rule("acme", "tools/list", "t")]);
        assert_eq!(table.resolve("acme", "prompts/list", &json!({})), None);
        assert_eq!(table.resolve("unknown", "tools/list", &json!({})), None);
    }
}
