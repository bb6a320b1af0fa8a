//! End-to-end pipeline tests: dispatcher + plugin chain + backend pool,
//! plus HTTP-level round trips through the real router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcpgate_backend::BackendTarget;
use mcpgate_plugins::{
    ContentPlugin, ExecutionMode, PluginApplication, PluginCapabilities, PluginContext,
    PluginConfigDocument, PluginDescriptor, PluginOpResult, PluginRegistry, PluginResult,
    PluginType,
};
use mcpgate_protocol::{Content, RequestEnvelope, TransportKind};
use mcpgate_server::config::TenantConfig;
use mcpgate_server::{GatewayConfig, GatewayServer, MemoryAuditSink, RouteRule, ServerError};

fn base_config(backend_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.default_tenant = Some("acme".to_string());
    config.backends = vec![BackendTarget::http("tools", backend_url)];
    config.routes = vec![RouteRule {
        tenant: "*".to_string(),
        method: "*".to_string(),
        target: "tools".to_string(),
    }];
    config
}

fn deny_document(mode: ExecutionMode) -> PluginConfigDocument {
    PluginConfigDocument::from_descriptors(
        "acme",
        vec![
            PluginDescriptor::new(
                "acme",
                "method-denylist",
                PluginType::Deny,
                10,
                json!({"keywords": ["tools/list"]}),
            )
            .with_mode(mode),
        ],
    )
}

async fn tool_list_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": {"tools": [{"name": "echo"}]},
            "id": "a",
        })))
        .mount(&server)
        .await;
    server
}

fn envelope(method: &str) -> RequestEnvelope {
    RequestEnvelope::new("a", method, Value::Null, TransportKind::Http)
}

// Scenario: a request through an empty plugin chain reaches the backend and
// returns its tool list untouched.
#[tokio::test]
async fn empty_chain_forwards_to_backend() {
    let backend = tool_list_backend().await;
    let server = GatewayServer::builder(base_config(&backend.uri()))
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let result = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap();
    assert_eq!(result["tools"][0]["name"], json!("echo"));
}

// Scenario: an enforcing deny plugin with "tools/list" in its list blocks
// the same request with the policy code and a deny violation.
#[tokio::test]
async fn enforcing_deny_blocks_with_policy_code() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(deny_document(ExecutionMode::Enforcing)),
            ..TenantConfig::default()
        },
    );
    let audit = Arc::new(MemoryAuditSink::new());
    let server = GatewayServer::builder(config)
        .with_audit(audit.clone())
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let err = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap_err();

    assert_eq!(err.jsonrpc_code(), -32010);
    assert_eq!(err.http_status(), 403);
    let data = err.error_data().unwrap();
    assert_eq!(data["violations"][0]["category"], json!("deny"));

    // The violation also reached the audit sink, and the error counter moved.
    let entries = audit.entries();
    assert!(!entries.is_empty());
    assert_eq!(entries[0].violations[0].category, "deny");
    assert_eq!(ctx.metrics.error_count("policy_blocked", "acme"), 1);

    // The backend never saw the request.
    assert!(backend.received_requests().await.unwrap().is_empty());
}

// A permissive deny plugin lets the same request through and audits it.
#[tokio::test]
async fn permissive_deny_allows_and_audits() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(deny_document(ExecutionMode::Permissive)),
            ..TenantConfig::default()
        },
    );
    let audit = Arc::new(MemoryAuditSink::new());
    let server = GatewayServer::builder(config)
        .with_audit(audit.clone())
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let result = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap();
    assert_eq!(result["tools"][0]["name"], json!("echo"));
    assert!(!audit.entries().is_empty());
}

/// Plugin that sleeps past every configured timeout
struct StalledPlugin {
    capabilities: PluginCapabilities,
}

#[async_trait]
impl ContentPlugin for StalledPlugin {
    fn name(&self) -> &str {
        "stalled"
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
        _content: &Content,
    ) -> PluginOpResult<PluginApplication> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok((PluginResult::allow(), None))
    }
}

fn stalled_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new(reqwest::Client::new());
    registry.register(PluginType::CustomLlm, |_descriptor| {
        Ok(Arc::new(StalledPlugin {
            capabilities: PluginCapabilities::all_directions().external(),
        }))
    });
    registry
}

fn stalled_document(mode: ExecutionMode) -> PluginConfigDocument {
    PluginConfigDocument::from_descriptors(
        "acme",
        vec![
            PluginDescriptor::new("acme", "stalled", PluginType::CustomLlm, 10, json!({}))
                .with_mode(mode),
        ],
    )
}

// Scenario: a plugin exceeding its timeout in permissive mode lets the
// request through and writes one audit entry with reason "plugin timeout".
#[tokio::test]
async fn permissive_timeout_allows_with_audit_entry() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.defaults.plugin_timeout_external_ms = 50;
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(stalled_document(ExecutionMode::Permissive)),
            ..TenantConfig::default()
        },
    );
    let audit = Arc::new(MemoryAuditSink::new());
    let server = GatewayServer::builder(config)
        .with_registry(stalled_registry())
        .with_audit(audit.clone())
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let result = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap();
    assert_eq!(result["tools"][0]["name"], json!("echo"));

    let entries = audit.entries();
    assert!(entries.iter().any(|e| e.reason == "plugin timeout"));
}

// The same stall in enforcing mode surfaces the plugin-timeout code.
#[tokio::test]
async fn enforcing_timeout_maps_to_plugin_timeout_code() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.defaults.plugin_timeout_external_ms = 50;
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(stalled_document(ExecutionMode::Enforcing)),
            ..TenantConfig::default()
        },
    );
    let server = GatewayServer::builder(config)
        .with_registry(stalled_registry())
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let err = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32011);
    assert_eq!(err.http_status(), 504);
}

// Scenario: a crashing STDIO backend surfaces backend-unavailable, and a
// healthy one recovers on the next request within the restart budget.
#[tokio::test]
async fn stdio_backend_crash_maps_to_backend_unavailable() {
    let mut config = GatewayConfig::default();
    config.auth.default_tenant = Some("acme".to_string());
    let mut target = BackendTarget::stdio("crashy", vec!["false".to_string()]);
    target.timeout_ms = 1_000;
    config.backends = vec![target];
    config.routes = vec![RouteRule {
        tenant: "*".to_string(),
        method: "*".to_string(),
        target: "crashy".to_string(),
    }];
    let server = GatewayServer::builder(config).build().unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let err = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32012);
    assert!(matches!(err, ServerError::Backend(_)));
}

// Unroutable methods surface method-not-found.
#[tokio::test]
async fn unrouted_method_is_not_found() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.routes = vec![RouteRule {
        tenant: "*".to_string(),
        method: "prompts/*".to_string(),
        target: "tools".to_string(),
    }];
    let server = GatewayServer::builder(config).build().unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Http).unwrap();
    let err = ctx
        .dispatcher
        .dispatch(envelope("tools/list"), &session)
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), -32601);
    assert_eq!(err.http_status(), 404);
}

// HTTP-level round trip through the real router: scenario 1 and 2 as a
// client would see them.
#[tokio::test]
async fn rpc_endpoint_round_trip() {
    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(deny_document(ExecutionMode::Enforcing)),
            ..TenantConfig::default()
        },
    );
    let server = GatewayServer::builder(config).build().unwrap();
    let app = server.router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    // tools/call is not in the deny list and flows through.
    let response = client
        .post(format!("http://{addr}/rpc"))
        .json(&json!({"jsonrpc": "2.0", "method": "tools/call",
                      "params": {"name": "echo"}, "id": "a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-session-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], json!("a"));
    assert!(body.get("result").is_some());

    // tools/list trips the deny plugin: 200 with the -32010 error body.
    let response = client
        .post(format!("http://{addr}/rpc"))
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": "a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32010));
    assert_eq!(body["id"], json!("a"));
    assert_eq!(
        body["error"]["data"]["violations"][0]["category"],
        json!("deny")
    );

    // Health endpoint reports the backend.
    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["backends"][0]["id"], json!("tools"));
}

// Scenario: a WebSocket client sends a frame sequence with one frame that
// trips an enforcing deny plugin. The blocked frame comes back as an error
// frame with the policy code, the session stays open, and every later frame
// is evaluated independently and succeeds.
#[tokio::test]
async fn ws_blocked_frame_leaves_session_open() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let backend = tool_list_backend().await;
    let mut config = base_config(&backend.uri());
    config.tenants.insert(
        "acme".to_string(),
        TenantConfig {
            plugins: Some(deny_document(ExecutionMode::Enforcing)),
            ..TenantConfig::default()
        },
    );
    let server = GatewayServer::builder(config).build().unwrap();
    let ctx = server.context();
    let app = server.router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // The first server frame announces the session id.
    let hello = socket.next().await.unwrap().unwrap();
    let hello: Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
    let session_id = hello["session_id"].as_str().unwrap().to_string();

    // Frame 5 carries the denied method; the rest are clean tools/call.
    for i in 1..=9 {
        let method = if i == 5 { "tools/list" } else { "tools/call" };
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {"name": "echo"},
            "id": format!("f{i}"),
        });
        socket
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .unwrap();

        let reply = socket.next().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(reply["id"], json!(format!("f{i}")));
        if i == 5 {
            assert_eq!(reply["error"]["code"], json!(-32010));
            assert_eq!(
                reply["error"]["data"]["violations"][0]["category"],
                json!("deny")
            );
        } else {
            assert!(reply.get("result").is_some(), "frame {i} should succeed");
        }
    }

    // The session survived the blocked frame.
    let session = ctx.sessions.lookup(&session_id).unwrap();
    assert_eq!(
        session.state(),
        mcpgate_session::SessionState::Active
    );

    // Only the eight clean frames reached the backend; the route was
    // resolved once for the whole connection.
    assert_eq!(backend.received_requests().await.unwrap().len(), 8);
}

// Scenario: SSE replay after a reconnect resumes exactly after the cursor.
#[tokio::test]
async fn sse_replay_resumes_after_cursor() {
    let backend = tool_list_backend().await;
    let server = GatewayServer::builder(base_config(&backend.uri()))
        .build()
        .unwrap();
    let ctx = server.context();

    let session = ctx.sessions.open("acme", None, TransportKind::Sse).unwrap();
    for i in 1..=5 {
        session.push_frame("message", format!("{{\"n\":{i}}}")).unwrap();
    }

    let frames = session.replay(3).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].id, 4);
    assert_eq!(frames[1].id, 5);
}
