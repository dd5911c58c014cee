//! MCP client over a transport session.
//!
//! The client opens the memory-stream bridge in reverse: outbound session
//! writes carry JSON-RPC requests framed with the client's stream id;
//! inbound reads are parsed and resolved against the pending-request
//! table. The table is the only shared mutable state; every entry either
//! resolves, times out, or is cancelled when the session ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use agentfabric_core::mcp::{
    Implementation, InitializeRequest, InitializeResponse, ListToolsResponse, Tool,
    ToolCallRequest, ToolCallResponse, MCP_PROTOCOL_VERSION,
};
use agentfabric_core::protocol::mcp_methods;
use agentfabric_core::{
    FabricError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, McpFrame, RequestId, Result,
    Topic,
};
use agentfabric_transport::{Transport, TransportSession};

type PendingTable = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// Client for an MCP bridge reachable over a transport topic.
pub struct McpClient {
    session: Arc<TransportSession>,
    pending: PendingTable,
    stream_id: String,
    next_id: AtomicI64,
    next_seq: AtomicU64,
    timeout: Duration,
    server_info: Implementation,
}

impl McpClient {
    /// Open a session to the bridge, start the reader, and run the MCP
    /// initialize handshake.
    pub async fn connect(topic: Topic, transport: Arc<dyn Transport>) -> Result<Self> {
        let session = Arc::new(transport.open_session(topic.clone()).await?);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let stream_id = Uuid::new_v4().to_string();

        let reader_session = Arc::clone(&session);
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            loop {
                let raw = match reader_session.recv().await {
                    Some(raw) => raw,
                    None => break,
                };
                let message = match McpFrame::decode(&raw).and_then(|f| f.message()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%e, "dropping undecodable mcp frame");
                        continue;
                    }
                };
                match message {
                    JsonRpcMessage::Response(response) => {
                        let Some(id) = response.id.clone() else {
                            debug!("response without id on mcp stream");
                            continue;
                        };
                        let waiter = {
                            let mut pending =
                                reader_pending.lock().expect("pending lock poisoned");
                            pending.remove(&id)
                        };
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(%id, "no awaiter for mcp response"),
                        }
                    }
                    JsonRpcMessage::Request(request) => {
                        debug!(method = %request.method, "ignoring server-initiated request");
                    }
                }
            }
            // Session ended: cancel everything still waiting.
            let mut pending = reader_pending.lock().expect("pending lock poisoned");
            pending.clear();
        });

        let mut client = Self {
            session,
            pending,
            stream_id,
            next_id: AtomicI64::new(1),
            next_seq: AtomicU64::new(0),
            timeout: Duration::from_secs(30),
            server_info: Implementation {
                name: String::new(),
                version: String::new(),
            },
        };
        client.initialize(&topic).await?;
        Ok(client)
    }

    async fn initialize(&mut self, topic: &Topic) -> Result<()> {
        let params = InitializeRequest {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "agentfabric-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let response = self
            .send_request(mcp_methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResponse = serde_json::from_value(unwrap_result(response)?)
            .map_err(|e| FabricError::decode(format!("initialize response: {e}")))?;
        debug!(topic = %topic, server = %init.server_info.name, "mcp session initialized");
        self.server_info = init.server_info;

        self.send_notification(mcp_methods::INITIALIZED, None).await
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send_frame(&self, message: &JsonRpcRequest) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = McpFrame::new(self.stream_id.clone(), seq, serde_json::to_vec(message)?);
        self.session.send(frame.encode()?).await
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = RequestId::number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest::new(method, params, Some(id.clone()));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.insert(id.clone(), tx);
        }
        self.send_frame(&request).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FabricError::Cancelled),
            Err(_) => {
                let mut pending = self.pending.lock().expect("pending lock poisoned");
                pending.remove(&id);
                Err(FabricError::timeout(format!("mcp {method}")))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send_frame(&JsonRpcRequest::notification(method, params))
            .await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let response = self.send_request(mcp_methods::TOOLS_LIST, None).await?;
        let list: ListToolsResponse = serde_json::from_value(unwrap_result(response)?)
            .map_err(|e| FabricError::decode(format!("tools/list response: {e}")))?;
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
            .map_err(|e| FabricError::decode(format!("tools/call response: {e}")))
    }

    pub async fn ping(&self) -> Result<()> {
        self.send_request(mcp_methods::PING, None).await.map(|_| ())
    }

    /// Close the session; in-flight requests fail with `Cancelled`.
    pub fn close(&self) {
        self.session.close();
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
