//! In-process MCP service: tool registry plus the channel-driven run loop.
//!
//! The service plays the role a stdio-launched MCP server would: it reads
//! JSON-RPC messages from a bounded inbound channel, dispatches them, and
//! writes responses to a bounded outbound channel. Bridges own the channel
//! pair and decide what the other ends connect to (a transport
//! subscription, or an HTTP handler).

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use agentfabric_core::mcp::{
    Implementation, InitializeRequest, InitializeResponse, ListToolsResponse, Tool,
    ToolCallRequest, ToolCallResponse, MCP_PROTOCOL_VERSION,
};
use agentfabric_core::protocol::mcp_methods;
use agentfabric_core::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};

use crate::handlers::ToolHandler;

/// One record on a memory-stream channel: the message plus the stream it
/// belongs to, so responses can be routed back to the right client.
#[derive(Debug)]
pub struct StreamRecord {
    pub stream_id: String,
    pub message: JsonRpcMessage,
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// MCP server engine with a static tool registry.
pub struct McpService {
    info: Implementation,
    tools: Vec<RegisteredTool>,
}

impl McpService {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            tools: Vec::new(),
        }
    }

    pub fn register_tool(mut self, tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push(RegisteredTool { tool, handler });
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    /// Dispatch one message. `None` means nothing should be written back
    /// (notifications, stray responses).
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let request = match message {
            JsonRpcMessage::Request(request) => request,
            JsonRpcMessage::Response(_) => {
                debug!("ignoring stray response on server stream");
                return None;
            }
        };
        if request.is_notification() {
            self.handle_notification(&request);
            return None;
        }
        let response = self.handle_request(request).await;
        Some(JsonRpcMessage::Response(response))
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            mcp_methods::INITIALIZED => debug!("client confirmed initialization"),
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            mcp_methods::INITIALIZE => {
                let client: Option<InitializeRequest> = request
                    .params
                    .and_then(|raw| serde_json::from_value(raw).ok());
                if let Some(client) = &client {
                    debug!(client = %client.client_info.name, "initialize");
                }
                let response = InitializeResponse {
                    protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                    capabilities: json!({"tools": {}}),
                    server_info: self.info.clone(),
                };
                match serde_json::to_value(response) {
                    Ok(value) => JsonRpcResponse::success(value, id),
                    Err(e) => JsonRpcResponse::error(
                        JsonRpcError::internal_error(Some(e.to_string())),
                        id,
                    ),
                }
            }
            mcp_methods::PING => JsonRpcResponse::success(json!({}), id),
            mcp_methods::TOOLS_LIST => {
                let response = ListToolsResponse {
                    tools: self.tools(),
                    next_cursor: None,
                };
                match serde_json::to_value(response) {
                    Ok(value) => JsonRpcResponse::success(value, id),
                    Err(e) => JsonRpcResponse::error(
                        JsonRpcError::internal_error(Some(e.to_string())),
                        id,
                    ),
                }
            }
            mcp_methods::TOOLS_CALL => {
                let call: ToolCallRequest = match request
                    .params
                    .ok_or_else(|| JsonRpcError::invalid_params(None))
                    .and_then(|raw| {
                        serde_json::from_value(raw)
                            .map_err(|e| JsonRpcError::invalid_params(Some(e.to_string())))
                    }) {
                    Ok(call) => call,
                    Err(err) => return JsonRpcResponse::error(err, id),
                };
                let registered = match self.tools.iter().find(|t| t.tool.name == call.name) {
                    Some(registered) => registered,
                    None => {
                        return JsonRpcResponse::error(
                            JsonRpcError::invalid_params(Some(format!(
                                "unknown tool: {}",
                                call.name
                            ))),
                            id,
                        );
                    }
                };
                // Tool failures travel in-band: callers see `isError`,
                // not a JSON-RPC fault.
                let result = match registered.handler.handle(call.arguments).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(tool = %call.name, %e, "tool handler failed");
                        ToolCallResponse::error(e.to_string())
                    }
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(value, id),
                    Err(e) => JsonRpcResponse::error(
                        JsonRpcError::internal_error(Some(e.to_string())),
                        id,
                    ),
                }
            }
            other => JsonRpcResponse::error(JsonRpcError::method_not_found(other), id),
        }
    }

    /// Channel-driven run loop. Terminates when the inbound channel
    /// closes; outbound sends suspend when the bounded channel is full.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: tokio::sync::mpsc::Receiver<StreamRecord>,
        outbound: tokio::sync::mpsc::Sender<StreamRecord>,
    ) {
        while let Some(record) = inbound.recv().await {
            if let Some(reply) = self.handle_message(record.message).await {
                let out = StreamRecord {
                    stream_id: record.stream_id,
                    message: reply,
                };
                if outbound.send(out).await.is_err() {
                    debug!("mcp outbound channel closed, stopping run loop");
                    break;
                }
            }
        }
        debug!(server = %self.info.name, "mcp run loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfabric_core::{FabricError, RequestId, Result};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Forecast;

    #[async_trait]
    impl ToolHandler for Forecast {
        async fn handle(&self, arguments: Option<Value>) -> Result<ToolCallResponse> {
            let location = arguments
                .as_ref()
                .and_then(|a| a.get("location"))
                .and_then(|l| l.as_str())
                .ok_or_else(|| FabricError::handler("missing location"))?;
            let _ = location;
            Ok(ToolCallResponse::text(
                "Temperature: 30°C\nHumidity: 50%\nCondition: Sunny\n",
            ))
        }
    }

    fn service() -> Arc<McpService> {
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

    fn request(method: &str, params: Option<Value>, id: i64) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(
            method,
            params,
            Some(RequestId::number(id)),
        ))
    }

    async fn expect_response(service: &McpService, message: JsonRpcMessage) -> JsonRpcResponse {
        match service.handle_message(message).await {
            Some(JsonRpcMessage::Response(response)) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_and_list_tools() {
        let service = service();
        let response =
            expect_response(&service, request(mcp_methods::INITIALIZE, None, 1)).await;
        let init: InitializeResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(init.server_info.name, "weather_server");

        assert!(service
            .handle_message(JsonRpcMessage::Request(JsonRpcRequest::notification(
                mcp_methods::INITIALIZED,
                None,
            )))
            .await
            .is_none());

        let response = expect_response(&service, request(mcp_methods::TOOLS_LIST, None, 2)).await;
        let list: ListToolsResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].name, "get_forecast");
    }

    #[tokio::test]
    async fn test_tool_call() {
        let service = service();
        let response = expect_response(
            &service,
            request(
                mcp_methods::TOOLS_CALL,
                Some(json!({"name": "get_forecast", "arguments": {"location": "Colombia"}})),
                3,
            ),
        )
        .await;
        let result: ToolCallResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(
            result.content,
            vec![agentfabric_core::ToolContent::text(
                "Temperature: 30°C\nHumidity: 50%\nCondition: Sunny\n"
            )]
        );
    }

    #[tokio::test]
    async fn test_tool_failure_is_in_band() {
        let service = service();
        let response = expect_response(
            &service,
            request(
                mcp_methods::TOOLS_CALL,
                Some(json!({"name": "get_forecast", "arguments": {}})),
                4,
            ),
        )
        .await;
        assert!(!response.is_error());
        let result: ToolCallResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let service = service();
        let response = expect_response(
            &service,
            request(
                mcp_methods::TOOLS_CALL,
                Some(json!({"name": "no_such_tool"})),
                5,
            ),
        )
        .await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_run_loop_terminates_when_inbound_closes() {
        let service = service();
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let task = tokio::spawn(service.run(in_rx, out_tx));

        in_tx
            .send(StreamRecord {
                stream_id: "s1".to_string(),
                message: request(mcp_methods::PING, None, 9),
            })
            .await
            .unwrap();
        let reply = out_rx.recv().await.unwrap();
        assert_eq!(reply.stream_id, "s1");

        drop(in_tx);
        task.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }
}
