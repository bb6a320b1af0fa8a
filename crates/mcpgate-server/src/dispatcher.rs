//! Request dispatcher
//!
//! The unary pipeline for one exchange: inbound plugins, route resolution,
//! pre-tool plugins, backend invoke, post-tool plugins, outbound plugins.
//! Every stage runs under the request deadline and the session's
//! cancellation token.
//!
//! Streaming transports split the pipeline: [`Dispatcher::open_stream`]
//! resolves the target and runs the pre-tool chain once at stream open, and
//! [`Dispatcher::dispatch_frame`] runs only the inbound chain, the backend
//! call, and the outbound chain for each subsequent frame against the cached
//! route. Frames that bypass both (broadcasts) still pass the outbound chain
//! through [`Dispatcher::check_outbound_frame`].

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mcpgate_backend::BackendPool;
use mcpgate_plugins::{ChainOutcome, PluginAction, PluginContext, PluginManager};
use mcpgate_protocol::{Content, Direction, RequestEnvelope};
use mcpgate_session::Session;

use crate::audit::{AuditEntry, AuditSink};
use crate::config::GatewayConfig;
use crate::error::{ServerError, ServerResult};
use crate::metrics::GatewayMetrics;
use crate::routing::RoutingTable;

/// Drives envelopes through the plugin chain and backend pool
pub struct Dispatcher {
    config: Arc<GatewayConfig>,
    plugins: Arc<PluginManager>,
    backends: Arc<BackendPool>,
    routing: Arc<RoutingTable>,
    metrics: Arc<GatewayMetrics>,
    audit: Arc<dyn AuditSink>,
}

/// A streaming session's routing decision, made once at stream open
///
/// Cached by the transport for the life of the stream so per-frame dispatch
/// skips resolution and the pre-tool chain.
#[derive(Debug, Clone)]
pub struct StreamRoute {
    target: String,
}

impl StreamRoute {
    /// The resolved backend target id
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Dispatcher {
    /// Wire up a dispatcher
    pub fn new(
        config: Arc<GatewayConfig>,
        plugins: Arc<PluginManager>,
        backends: Arc<BackendPool>,
        routing: Arc<RoutingTable>,
        metrics: Arc<GatewayMetrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            plugins,
            backends,
            routing,
            metrics,
            audit,
        }
    }

    fn plugin_context(&self, session: &Session) -> PluginContext {
        let mut cx = PluginContext::new(session.tenant_id()).with_session(session.id());
        if let Some(user) = session.user_id() {
            cx = cx.with_user(user);
        }
        cx
    }

    /// Content plugins inspect for a request: method plus params
    fn request_content(envelope: &RequestEnvelope) -> Content {
        let mut body = json!({"method": envelope.method()});
        if !envelope.params().is_null() {
            body["params"] = envelope.params().clone();
        }
        Content::json(body)
    }

    /// Run one chain stage, recording audit entries and metrics
    async fn run_stage(
        &self,
        cx: &PluginContext,
        session: &Session,
        envelope: &RequestEnvelope,
        content: Content,
        direction: Direction,
    ) -> ServerResult<ChainOutcome> {
        let staged = envelope.with_direction(direction);
        let outcome = self
            .plugins
            .apply(cx, &staged, content, direction)
            .await
            .map_err(ServerError::from)?;

        if !outcome.violations.is_empty() || outcome.action >= PluginAction::Audit {
            // Best-effort: the sink swallows its own failures.
            self.audit
                .record(
                    AuditEntry::new(
                        session.tenant_id(),
                        envelope.request_id(),
                        direction,
                        outcome.action,
                    )
                    .with_session(session.id())
                    .with_reason(outcome.reason.clone())
                    .with_blocked_by(outcome.blocked_by.clone())
                    .with_violations(outcome.violations.clone()),
                )
                .await;
        }

        if outcome.is_blocked() {
            self.metrics
                .record_block(session.tenant_id(), outcome.violations.len());
            if outcome.timed_out {
                return Err(ServerError::PluginTimeout {
                    plugin: outcome.blocked_by,
                });
            }
            return Err(ServerError::blocked(&outcome.violations));
        }
        self.metrics
            .record_violations(session.tenant_id(), outcome.violations.len());
        Ok(outcome)
    }

    /// The unary pipeline: one envelope in, one result value out
    pub async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        session: &Session,
    ) -> ServerResult<Value> {
        let tenant = session.tenant_id().to_string();
        if !self.config.tenant_active(&tenant) {
            return Err(ServerError::TenantUnavailable(tenant));
        }
        session.touch()?;
        self.metrics.record_request(&tenant);

        let started = Instant::now();
        let deadline = started + self.config.request_timeout(&tenant);
        let cancel = session.cancellation_token();
        let result = self
            .run_pipeline(&envelope, session, deadline, &cancel)
            .await;
        self.metrics.record_latency(started.elapsed());
        if let Err(err) = &result {
            self.metrics.record_error(err.kind(), &tenant);
        }
        result
    }

    async fn run_pipeline(
        &self,
        envelope: &RequestEnvelope,
        session: &Session,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ServerResult<Value> {
        let cx = self.plugin_context(session);

        // Inbound chain over the request content.
        let inbound = self
            .run_stage(
                &cx,
                session,
                envelope,
                Self::request_content(envelope),
                Direction::Inbound,
            )
            .await?;

        // Resolve the target within the tenant's namespace.
        let target = self
            .routing
            .resolve(session.tenant_id(), envelope.method(), envelope.params())
            .ok_or_else(|| ServerError::Routing {
                method: envelope.method().to_string(),
            })?;
        debug!(target_id = %target, method = %envelope.method(), "resolved backend target");

        // Pre-tool chain continues over the (possibly modified) content.
        let pre_tool = self
            .run_stage(&cx, session, envelope, inbound.content, Direction::PreTool)
            .await?;

        // Forward the post-chain params to the backend.
        let params = pre_tool
            .content
            .structured()
            .and_then(|v| v.get("params"))
            .cloned()
            .unwrap_or_else(|| envelope.params().clone());
        let mut payload = json!({
            "jsonrpc": "2.0",
            "method": envelope.method(),
        });
        if !params.is_null() {
            payload["params"] = params;
        }
        payload["id"] = json!(envelope.request_id());

        if Instant::now() >= deadline {
            return Err(ServerError::Timeout);
        }
        let reply = self
            .backends
            .invoke(&target, payload, deadline, cancel)
            .await?;
        let result = reply.get("result").cloned().unwrap_or(reply);

        // Post-tool and outbound chains over the backend's output.
        let post_tool = self
            .run_stage(
                &cx,
                session,
                envelope,
                Content::json(result),
                Direction::PostTool,
            )
            .await?;
        let outbound = self
            .run_stage(&cx, session, envelope, post_tool.content, Direction::Outbound)
            .await?;

        let final_value = outbound
            .content
            .structured()
            .cloned()
            .unwrap_or(Value::Null);
        Ok(final_value)
    }

    /// Stream open: resolve the target and run the pre-tool chain once
    ///
    /// Streaming transports call this with their opening envelope and cache
    /// the returned route for the life of the stream.
    pub async fn open_stream(
        &self,
        envelope: &RequestEnvelope,
        session: &Session,
    ) -> ServerResult<StreamRoute> {
        let tenant = session.tenant_id().to_string();
        if !self.config.tenant_active(&tenant) {
            return Err(ServerError::TenantUnavailable(tenant));
        }
        session.touch()?;

        let target = self
            .routing
            .resolve(session.tenant_id(), envelope.method(), envelope.params())
            .ok_or_else(|| ServerError::Routing {
                method: envelope.method().to_string(),
            })?;
        debug!(target_id = %target, method = %envelope.method(), "stream route resolved");

        let cx = self.plugin_context(session);
        self.run_stage(
            &cx,
            session,
            envelope,
            Self::request_content(envelope),
            Direction::PreTool,
        )
        .await?;
        Ok(StreamRoute { target })
    }

    /// One frame on an open stream
    ///
    /// Runs the inbound chain on the client frame, invokes the stream's
    /// cached target, and runs the outbound chain on the backend's reply.
    /// Resolution and pre-tool happened at [`Dispatcher::open_stream`].
    pub async fn dispatch_frame(
        &self,
        envelope: RequestEnvelope,
        session: &Session,
        route: &StreamRoute,
    ) -> ServerResult<Value> {
        let tenant = session.tenant_id().to_string();
        if !self.config.tenant_active(&tenant) {
            return Err(ServerError::TenantUnavailable(tenant));
        }
        session.touch()?;
        self.metrics.record_request(&tenant);

        let started = Instant::now();
        let deadline = started + self.config.request_timeout(&tenant);
        let cancel = session.cancellation_token();
        let result = self
            .run_frame(&envelope, session, route, deadline, &cancel)
            .await;
        self.metrics.record_latency(started.elapsed());
        if let Err(err) = &result {
            self.metrics.record_error(err.kind(), &tenant);
        }
        result
    }

    async fn run_frame(
        &self,
        envelope: &RequestEnvelope,
        session: &Session,
        route: &StreamRoute,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ServerResult<Value> {
        let cx = self.plugin_context(session);

        let inbound = self
            .run_stage(
                &cx,
                session,
                envelope,
                Self::request_content(envelope),
                Direction::Inbound,
            )
            .await?;

        let params = inbound
            .content
            .structured()
            .and_then(|v| v.get("params"))
            .cloned()
            .unwrap_or_else(|| envelope.params().clone());
        let mut payload = json!({
            "jsonrpc": "2.0",
            "method": envelope.method(),
        });
        if !params.is_null() {
            payload["params"] = params;
        }
        payload["id"] = json!(envelope.request_id());

        if Instant::now() >= deadline {
            return Err(ServerError::Timeout);
        }
        let reply = self
            .backends
            .invoke(route.target(), payload, deadline, cancel)
            .await?;
        let result = reply.get("result").cloned().unwrap_or(reply);

        let outbound = self
            .run_stage(&cx, session, envelope, Content::json(result), Direction::Outbound)
            .await?;
        Ok(outbound
            .content
            .structured()
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Outbound chain for one server-to-client frame on a streaming session
    /// (broadcasts and other frames that did not come through the unary
    /// pipeline)
    ///
    /// A block here ends the stream: the caller emits a final error frame and
    /// closes the session.
    pub async fn check_outbound_frame(
        &self,
        envelope: &RequestEnvelope,
        session: &Session,
        frame: Value,
    ) -> ServerResult<Value> {
        let cx = self.plugin_context(session);
        let outcome = self
            .run_stage(
                &cx,
                session,
                envelope,
                Content::json(frame),
                Direction::Outbound,
            )
            .await?;
        Ok(outcome
            .content
            .structured()
            .cloned()
            .unwrap_or(Value::Null))
    }
}
