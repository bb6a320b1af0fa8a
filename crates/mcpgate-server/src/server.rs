//! Gateway assembly and lifecycle
//!
//! The builder wires every component into a [`GatewayContext`] - no hidden
//! module state, so tests can run several gateways side by side. `run` serves
//! until the shutdown signal, then drains: cancel the token tree, stop
//! accepting, reap sessions, and stop backend children.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mcpgate_backend::BackendPool;
use mcpgate_plugins::{PluginManager, PluginRegistry};
use mcpgate_session::SessionRegistry;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::{AuthProvider, StaticAuthProvider};
use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::endpoints;
use crate::error::{ServerError, ServerResult};
use crate::metrics::GatewayMetrics;
use crate::routing::RoutingTable;
use crate::stdio_endpoint;

/// Everything the endpoints and dispatcher share
pub struct GatewayContext {
    /// Parsed configuration
    pub config: Arc<GatewayConfig>,
    /// Session registry
    pub sessions: Arc<SessionRegistry>,
    /// Per-tenant plugin chains
    pub plugins: Arc<PluginManager>,
    /// Backend pool
    pub backends: Arc<BackendPool>,
    /// Tenant routing tables
    pub routing: Arc<RoutingTable>,
    /// Process metrics
    pub metrics: Arc<GatewayMetrics>,
    /// Audit sink
    pub audit: Arc<dyn AuditSink>,
    /// Authentication seam
    pub auth: Arc<dyn AuthProvider>,
    /// Request dispatcher
    pub dispatcher: Dispatcher,
    /// Root of the cancellation tree
    pub shutdown: CancellationToken,
}

/// Builder for a gateway instance
pub struct GatewayBuilder {
    config: GatewayConfig,
    auth: Option<Arc<dyn AuthProvider>>,
    audit: Option<Arc<dyn AuditSink>>,
    registry: Option<PluginRegistry>,
}

impl GatewayBuilder {
    /// Start from a parsed config
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            auth: None,
            audit: None,
            registry: None,
        }
    }

    /// Override the auth provider (default: static API keys from config)
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the audit sink (default: structured tracing events)
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Override the plugin registry (tests register scripted types)
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wire everything together
    pub fn build(self) -> ServerResult<GatewayServer> {
        let config = Arc::new(self.config);
        config.validate()?;

        let shutdown = CancellationToken::new();
        let sessions = Arc::new(SessionRegistry::new(
            config.session.to_session_config(),
            shutdown.clone(),
        ));

        let http_client = reqwest::Client::new();
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(|| PluginRegistry::new(http_client.clone())),
        );
        let plugins = Arc::new(PluginManager::new(
            registry,
            config.defaults.plugin_timeouts(),
        ));
        for (tenant_id, tenant) in &config.tenants {
            if let Some(document) = &tenant.plugins {
                let mut document = document.clone();
                document.tenant_id = tenant_id.clone();
                plugins
                    .import(document)
                    .map_err(|e| ServerError::Configuration(e.to_string()))?;
            }
        }

        let backends = Arc::new(BackendPool::new(http_client));
        for target in &config.backends {
            backends
                .register(target.clone())
                .map_err(|e| ServerError::Configuration(e.to_string()))?;
        }

        let routing = Arc::new(RoutingTable::new(config.routes.clone()));
        let metrics = Arc::new(GatewayMetrics::default());
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink));
        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(StaticAuthProvider::from_settings(&config.auth)));

        let dispatcher = Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&plugins),
            Arc::clone(&backends),
            Arc::clone(&routing),
            Arc::clone(&metrics),
            Arc::clone(&audit),
        );

        Ok(GatewayServer {
            ctx: Arc::new(GatewayContext {
                config,
                sessions,
                plugins,
                backends,
                routing,
                metrics,
                audit,
                auth,
                dispatcher,
                shutdown,
            }),
        })
    }
}

/// A runnable gateway
pub struct GatewayServer {
    ctx: Arc<GatewayContext>,
}

impl GatewayServer {
    /// Builder entry point
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Shared context (tests drive the dispatcher through this)
    pub fn context(&self) -> Arc<GatewayContext> {
        Arc::clone(&self.ctx)
    }

    /// The axum router over all endpoints
    pub fn router(&self) -> axum::Router {
        endpoints::router(Arc::clone(&self.ctx))
    }

    /// Serve until the shutdown token fires (or SIGINT)
    pub async fn run(self) -> ServerResult<()> {
        let ctx = self.ctx;
        let reaper = ctx.sessions.spawn_reaper();
        let health_pings = ctx
            .backends
            .spawn_health_pings(std::time::Duration::from_secs(30), ctx.shutdown.clone());

        if let Some(stdio) = &ctx.config.stdio {
            let stdio_ctx = Arc::clone(&ctx);
            let tenant = stdio.tenant_id.clone();
            tokio::spawn(async move {
                if let Err(err) = stdio_endpoint::run(stdio_ctx, &tenant).await {
                    warn!(error = %err, "stdio endpoint failed");
                }
            });
        }

        let listener = tokio::net::TcpListener::bind(&ctx.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::Configuration(format!("bind {} failed: {e}", ctx.config.bind_addr))
            })?;
        info!(bind_addr = %ctx.config.bind_addr, "gateway listening");

        let app = endpoints::router(Arc::clone(&ctx));
        let shutdown = ctx.shutdown.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        });
        let result = serve.await.map_err(ServerError::Io);

        info!("gateway draining");
        ctx.shutdown.cancel();
        ctx.backends.shutdown().await;
        reaper.abort();
        health_pings.abort();
        info!("gateway stopped");
        result
    }
}
