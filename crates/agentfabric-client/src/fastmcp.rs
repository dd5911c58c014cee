//! FastMCP client: MCP over streamable HTTP.
//!
//! `connect` runs the two-POST handshake: `initialize` captures the
//! `Mcp-Session-Id` response header, `notifications/initialized` echoes it
//! back. Every later request carries the header.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use agentfabric_core::mcp::{
    Implementation, InitializeRequest, InitializeResponse, ListToolsResponse, Tool,
    ToolCallRequest, ToolCallResponse, MCP_PROTOCOL_VERSION,
};
use agentfabric_core::protocol::mcp_methods;
use agentfabric_core::{FabricError, JsonRpcRequest, JsonRpcResponse, RequestId, Result};

/// Header carrying the negotiated session id.
const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP client for a FastMCP bridge.
pub struct FastMcpHttpClient {
    http: reqwest::Client,
    url: String,
    session_id: String,
    next_id: AtomicI64,
    server_info: Implementation,
}

impl FastMcpHttpClient {
    /// Run the handshake against `url` and return a ready client.
    pub async fn connect(url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FabricError::connect(format!("http client: {e}")))?;

        let init = JsonRpcRequest::new(
            mcp_methods::INITIALIZE,
            Some(serde_json::to_value(InitializeRequest {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities: serde_json::json!({}),
                client_info: Implementation {
                    name: "agentfabric-client".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            })?),
            Some(RequestId::number(1)),
        );
        let response = http
            .post(&url)
            .json(&init)
            .send()
            .await
            .map_err(|e| FabricError::connect(format!("initialize post: {e}")))?;
        if !response.status().is_success() {
            return Err(FabricError::connect(format!(
                "initialize rejected with {}",
                response.status()
            )));
        }
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| FabricError::protocol("initialize response lacks Mcp-Session-Id"))?;
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| FabricError::decode(format!("initialize response: {e}")))?;
        let init_result: InitializeResponse = serde_json::from_value(unwrap_result(body)?)
            .map_err(|e| FabricError::decode(format!("initialize result: {e}")))?;
        debug!(server = %init_result.server_info.name, %session_id, "fastmcp session established");

        // Second POST confirms the session.
        let confirm = JsonRpcRequest::notification(mcp_methods::INITIALIZED, None);
        let response = http
            .post(&url)
            .header(SESSION_HEADER, &session_id)
            .json(&confirm)
            .send()
            .await
            .map_err(|e| FabricError::connect(format!("initialized post: {e}")))?;
        if !response.status().is_success() {
            return Err(FabricError::connect(format!(
                "initialized rejected with {}",
                response.status()
            )));
        }

        Ok(Self {
            http,
            url,
            session_id,
            next_id: AtomicI64::new(2),
            server_info: init_result.server_info,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, Some(RequestId::number(id)));
        let response = self
            .http
            .post(&self.url)
            .header(SESSION_HEADER, &self.session_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| FabricError::transport(format!("{method} post: {e}")))?;
        if !response.status().is_success() {
            return Err(FabricError::transport(format!(
                "{method} rejected with {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FabricError::decode(format!("{method} response: {e}")))
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let response = self.send_request(mcp_methods::TOOLS_LIST, None).await?;
        let list: ListToolsResponse = serde_json::from_value(unwrap_result(response)?)
            .map_err(|e| FabricError::decode(format!("tools/list result: {e}")))?;
        Ok(list.tools)
    }

    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<ToolCallResponse> {
        let call = ToolCallRequest {
            name: name.into(),
            arguments,
        };
        let response = self
            .send_request(mcp_methods::TOOLS_CALL, Some(serde_json::to_value(call)?))
            .await?;
        serde_json::from_value(unwrap_result(response)?)
            .map_err(|e| FabricError::decode(format!("tools/call result: {e}")))
    }
}

fn unwrap_result(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(FabricError::protocol(error.message));
    }
    response
        .result
        .ok_or_else(|| FabricError::protocol("response without result"))
}
