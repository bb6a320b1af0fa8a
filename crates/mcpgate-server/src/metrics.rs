//! Gateway metrics
//!
//! Lock-free counters on the hot path: request totals and a latency
//! histogram globally, error counters keyed by (kind, tenant), and a bounded
//! per-tenant table. Everything is process-local; the snapshot feeds the
//! status endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Value, json};

/// Upper bounds (ms) of the latency histogram buckets; the last bucket is
/// unbounded
pub const LATENCY_BOUNDS_MS: [u64; 10] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000];

/// Per-tenant counter set
#[derive(Debug, Default)]
pub struct TenantCounters {
    /// Requests started
    pub requests: AtomicU64,
    /// Requests that failed
    pub failures: AtomicU64,
    /// Requests rejected by policy
    pub blocked: AtomicU64,
    /// Violations recorded
    pub violations: AtomicU64,
}

/// Process-local gateway metrics
pub struct GatewayMetrics {
    requests_total: AtomicU64,
    failures_total: AtomicU64,
    blocked_total: AtomicU64,
    violations_total: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BOUNDS_MS.len() + 1],
    errors: DashMap<String, Arc<AtomicU64>>,
    tenants: DashMap<String, Arc<TenantCounters>>,
    max_tenants: usize,
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics")
            .field("requests_total", &self.requests_total.load(Ordering::Relaxed))
            .field("tenants", &self.tenants.len())
            .finish()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl GatewayMetrics {
    /// Metrics with a cap on tracked tenants
    pub fn new(max_tenants: usize) -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            blocked_total: AtomicU64::new(0),
            violations_total: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            errors: DashMap::new(),
            tenants: DashMap::new(),
            max_tenants,
        }
    }

    fn tenant(&self, tenant_id: &str) -> Arc<TenantCounters> {
        if let Some(counters) = self.tenants.get(tenant_id) {
            return Arc::clone(&counters);
        }
        // Bounded: past the cap, new tenants evict an arbitrary entry.
        if self.tenants.len() >= self.max_tenants {
            let evict = self.tenants.iter().next().map(|entry| entry.key().clone());
            if let Some(evict) = evict {
                self.tenants.remove(&evict);
            }
        }
        let counters = Arc::new(TenantCounters::default());
        self.tenants
            .insert(tenant_id.to_string(), Arc::clone(&counters));
        counters
    }

    /// Record a request start
    pub fn record_request(&self, tenant_id: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.tenant(tenant_id)
            .requests
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed request's latency
    pub fn record_latency(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let index = LATENCY_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BOUNDS_MS.len());
        self.latency_buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request, keyed by error kind and tenant
    pub fn record_error(&self, kind: &str, tenant_id: &str) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        self.tenant(tenant_id)
            .failures
            .fetch_add(1, Ordering::Relaxed);
        let counter = self
            .errors
            .entry(format!("{kind}:{tenant_id}"))
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a policy block with its violation count
    pub fn record_block(&self, tenant_id: &str, violations: usize) {
        self.blocked_total.fetch_add(1, Ordering::Relaxed);
        let tenant = self.tenant(tenant_id);
        tenant.blocked.fetch_add(1, Ordering::Relaxed);
        if violations > 0 {
            self.violations_total
                .fetch_add(violations as u64, Ordering::Relaxed);
            tenant
                .violations
                .fetch_add(violations as u64, Ordering::Relaxed);
        }
    }

    /// Record violations that did not block
    pub fn record_violations(&self, tenant_id: &str, count: usize) {
        if count > 0 {
            self.violations_total
                .fetch_add(count as u64, Ordering::Relaxed);
            self.tenant(tenant_id)
                .violations
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Error count for one (kind, tenant) pair
    pub fn error_count(&self, kind: &str, tenant_id: &str) -> u64 {
        self.errors
            .get(&format!("{kind}:{tenant_id}"))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Snapshot for the status endpoints
    pub fn snapshot(&self) -> Value {
        let latency: Vec<Value> = LATENCY_BOUNDS_MS
            .iter()
            .map(|b| json!(b.to_string()))
            .chain(std::iter::once(json!("inf")))
            .zip(self.latency_buckets.iter())
            .map(|(bound, counter)| json!({"le_ms": bound, "count": counter.load(Ordering::Relaxed)}))
            .collect();

        let errors: serde_json::Map<String, Value> = self
            .errors
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    json!(entry.value().load(Ordering::Relaxed)),
                )
            })
            .collect();

        json!({
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "failures_total": self.failures_total.load(Ordering::Relaxed),
            "blocked_total": self.blocked_total.load(Ordering::Relaxed),
            "violations_total": self.violations_total.load(Ordering::Relaxed),
            "latency": latency,
            "errors": errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_tenant() {
        let metrics = GatewayMetrics::new(10);
        metrics.record_request("acme");
        metrics.record_request("acme");
        metrics.record_error("backend", "acme");
        metrics.record_block("acme", 2);

        assert_eq!(metrics.error_count("backend", "acme"), 1);
        assert_eq!(metrics.error_count("backend", "globex"), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["requests_total"], 2);
        assert_eq!(snapshot["blocked_total"], 1);
        assert_eq!(snapshot["violations_total"], 2);
    }

    #[test]
    fn latency_lands_in_the_right_bucket() {
        let metrics = GatewayMetrics::new(10);
        metrics.record_latency(Duration::from_millis(3));
        metrics.record_latency(Duration::from_millis(700));
        metrics.record_latency(Duration::from_secs(30));

        let snapshot = metrics.snapshot();
        let buckets = snapshot["latency"].as_array().unwrap();
        // 3ms -> le 5, 700ms -> le 1000, 30s -> inf.
        assert_eq!(buckets[1]["count"], 1);
        assert_eq!(buckets[8]["count"], 1);
        assert_eq!(buckets[10]["count"], 1);
    }

    #[test]
    fn tenant_table_is_bounded() {
        let metrics = GatewayMetrics::new(2);
        metrics.record_request("a");
        metrics.record_request("b");
        metrics.record_request("c");
        assert!(metrics.tenants.len() <= 2);
    }
}
