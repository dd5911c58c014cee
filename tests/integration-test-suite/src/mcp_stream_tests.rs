//! MCP over the memory-stream bridge: tool listing and calls end to end
//! across the in-process fabric.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentfabric_client::McpClientFactory;
use agentfabric_core::mcp::{Tool, ToolCallResponse, ToolContent};
use agentfabric_core::{FabricError, Result, Topic};
use agentfabric_server::{AppSession, McpService, SessionTarget, ToolHandler};
use agentfabric_transport::Transport;

use crate::fabric::InMemoryFabric;

const FORECAST: &str = "Temperature: 30°C\nHumidity: 50%\nCondition: Sunny\n";

fn topic(name: &str) -> Topic {
    Topic::new("default", "default", name).unwrap()
}

struct Forecast;

#[async_trait]
impl ToolHandler for Forecast {
    async fn handle(&self, arguments: Option<Value>) -> Result<ToolCallResponse> {
        arguments
            .as_ref()
            .and_then(|a| a.get("location"))
            .and_then(|l| l.as_str())
            .ok_or_else(|| FabricError::handler("missing location"))?;
        Ok(ToolCallResponse::text(FORECAST))
    }
}

fn weather_service() -> Arc<McpService> {
    Arc::new(
        McpService::new("weather_server", "0.1.0").register_tool(
            Tool::new(
                "get_forecast",
                "Get the forecast for a location",
                json!({"type": "object", "properties": {"location": {"type": "string"}}}),
            ),
            Arc::new(Forecast),
        ),
    )
}

async fn start_weather_server(fabric: &InMemoryFabric) -> AppSession {
    let transport: Arc<dyn Transport> = fabric.connect(topic("weather_server"));
    let session = AppSession::new();
    session
        .add(SessionTarget::Mcp {
            service: weather_service(),
        })
        .with_transport(transport)
        .with_topic(topic("weather_server"))
        .with_session_id("weather-mcp")
        .build()
        .await
        .unwrap();
    session.start_all_sessions(false).await.unwrap();
    session
}

#[tokio::test]
async fn test_list_tools_and_call_tool() {
    let fabric = InMemoryFabric::new();
    let _server = start_weather_server(&fabric).await;

    let transport: Arc<dyn Transport> = fabric.connect(topic("mcp_client"));
    let client = tokio::time::timeout(
        Duration::from_secs(5),
        McpClientFactory::new().create_client(topic("weather_server"), transport),
    )
    .await
    .expect("handshake within deadline")
    .unwrap();
    assert_eq!(client.server_info().name, "weather_server");

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "get_forecast"));

    let result = client
        .call_tool("get_forecast", Some(json!({"location": "Colombia"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));
    assert_eq!(result.content, vec![ToolContent::text(FORECAST)]);

    client.close();
}

#[tokio::test]
async fn test_sequential_calls_stay_ordered() {
    let fabric = InMemoryFabric::new();
    let _server = start_weather_server(&fabric).await;

    let transport: Arc<dyn Transport> = fabric.connect(topic("mcp_client"));
    let client = McpClientFactory::new()
        .create_client(topic("weather_server"), transport)
        .await
        .unwrap();

    for _ in 0..5 {
        client.ping().await.unwrap();
        let result = client
            .call_tool("get_forecast", Some(json!({"location": "Colombia"})))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
    }
}

#[tokio::test]
async fn test_two_clients_multiplex_over_one_bridge() {
    let fabric = InMemoryFabric::new();
    let _server = start_weather_server(&fabric).await;

    let t1: Arc<dyn Transport> = fabric.connect(topic("client_one"));
    let t2: Arc<dyn Transport> = fabric.connect(topic("client_two"));
    let c1 = McpClientFactory::new()
        .create_client(topic("weather_server"), t1)
        .await
        .unwrap();
    let c2 = McpClientFactory::new()
        .create_client(topic("weather_server"), t2)
        .await
        .unwrap();

    let (r1, r2) = tokio::join!(
        c1.call_tool("get_forecast", Some(json!({"location": "Colombia"}))),
        c2.call_tool("get_forecast", Some(json!({"location": "Norway"}))),
    );
    assert_eq!(r1.unwrap().is_error, Some(false));
    assert_eq!(r2.unwrap().is_error, Some(false));
}
