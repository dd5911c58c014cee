//! FastMCP streamable-HTTP handshake over loopback.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentfabric_client::McpClientFactory;
use agentfabric_core::mcp::{Tool, ToolCallResponse};
use agentfabric_core::{Result, Topic};
use agentfabric_server::bridge::{Bridge, FastMcpHttpBridge};
use agentfabric_server::{McpService, ToolHandler};
use agentfabric_transport::Transport;

use crate::fabric::InMemoryFabric;

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn handle(&self, arguments: Option<Value>) -> Result<ToolCallResponse> {
        let text = arguments
            .as_ref()
            .and_then(|a| a.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        Ok(ToolCallResponse::text(text))
    }
}

fn echo_service() -> Arc<McpService> {
    Arc::new(McpService::new("echo_server", "0.1.0").register_tool(
        Tool::new("echo", "Echo the input", json!({"type": "object"})),
        Arc::new(EchoTool),
    ))
}

async fn start_bridge(service: Arc<McpService>) -> (FastMcpHttpBridge, String) {
    let bridge = FastMcpHttpBridge::with_address(service, "127.0.0.1", 0);
    bridge.start().await.unwrap();
    let addr = bridge.local_addr().unwrap();
    (bridge, format!("http://{addr}/"))
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "handshake-test", "version": "0.0.1"},
        },
    })
}

#[tokio::test]
async fn test_streamable_http_handshake() {
    let (bridge, url) = start_bridge(echo_service()).await;
    let http = reqwest::Client::new();

    // First POST: initialize mints the session id.
    let response = http
        .post(&url)
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .expect("initialize returns Mcp-Session-Id");
    assert!(!session_id.is_empty());

    // Second POST: the confirmation echoes the header.
    let response = http
        .post(&url)
        .header("mcp-session-id", &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // tools/list without the header is rejected.
    let response = http
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());

    // With the header the registered tools come back.
    let response = http
        .post(&url)
        .header("mcp-session-id", &session_id)
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["echo"]);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_session_rejected() {
    let (bridge, url) = start_bridge(echo_service()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(&url)
        .header("mcp-session-id", "not-a-session")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fastmcp_client_handshake_and_tool_call() {
    let (bridge, url) = start_bridge(echo_service()).await;

    let client = McpClientFactory::new()
        .create_http_client(url)
        .await
        .unwrap();
    assert!(!client.session_id().is_empty());
    assert_eq!(client.server_info().name, "echo_server");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);

    let result = client
        .call_tool("echo", Some(json!({"text": "ping"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transport_mirror_serves_both_paths() {
    let fabric = InMemoryFabric::new();
    let topic = Topic::new("default", "default", "echo_server").unwrap();
    let server_transport: Arc<dyn Transport> = fabric.connect(topic.clone());

    let bridge = FastMcpHttpBridge::with_address(echo_service(), "127.0.0.1", 0)
        .with_transport_mirror(server_transport, topic.clone());
    bridge.start().await.unwrap();
    let url = format!("http://{}/", bridge.local_addr().unwrap());

    // HTTP path.
    let http_client = McpClientFactory::new()
        .create_http_client(url)
        .await
        .unwrap();
    assert_eq!(http_client.list_tools().await.unwrap().len(), 1);

    // Transport path through the mirror.
    let client_transport: Arc<dyn Transport> =
        fabric.connect(Topic::new("default", "default", "mirror_client").unwrap());
    let stream_client = McpClientFactory::new()
        .create_client(topic, client_transport)
        .await
        .unwrap();
    assert_eq!(stream_client.list_tools().await.unwrap().len(), 1);

    bridge.shutdown().await.unwrap();
}
