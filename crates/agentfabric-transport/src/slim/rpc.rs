//! Native SLIM RPC: JSON-RPC calls over dedicated SLIM sessions.
//!
//! A channel owns its own authenticated connection. Unary calls ride a
//! request/reply session; streaming calls open a streaming session and
//! yield ordered response fragments until the server marks the last one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use agentfabric_core::{
    FabricError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId, Result,
    SlimRpcConnectionConfig, Topic,
};

use crate::slim::SlimTransport;
use crate::Transport;

const STREAM_CAPACITY: usize = 16;

/// Client side of a native SLIM RPC connection.
pub struct SlimRpcChannel {
    transport: SlimTransport,
    server: Topic,
    timeout: Duration,
    next_id: AtomicI64,
}

impl SlimRpcChannel {
    /// Authenticate against the node and address RPCs to `server`.
    pub async fn connect(config: SlimRpcConnectionConfig, server: Topic) -> Result<Self> {
        if config.identity == server {
            return Err(FabricError::connect(
                "rpc client identity must differ from the server identity",
            ));
        }
        let transport = SlimTransport::connect(config.connection()).await?;
        Ok(Self::from_transport(transport, server))
    }

    pub fn from_transport(transport: SlimTransport, server: Topic) -> Self {
        Self {
            transport,
            server,
            timeout: Duration::from_secs(30),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_request(&self, method: &str, params: Option<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(method, params, Some(RequestId::number(id)))
    }

    /// Unary call: one request, one correlated response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = self.next_request(method, params);
        let payload = Bytes::from(serde_json::to_vec(&request)?);
        let raw = self
            .transport
            .request_reply(self.server.clone(), payload, self.timeout)
            .await?;
        let response: JsonRpcResponse = serde_json::from_slice(&raw)
            .map_err(|e| FabricError::decode(format!("rpc response: {e}")))?;
        Ok(response)
    }

    /// Streaming call: ordered response fragments until the server closes
    /// the stream. Dropping the receiver cancels the session, which the
    /// server observes as client disconnect.
    pub async fn call_streaming(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<mpsc::Receiver<Result<JsonRpcResponse>>> {
        let request = self.next_request(method, params);
        let session = self.transport.open_session(self.server.clone()).await?;
        session
            .send(Bytes::from(serde_json::to_vec(&request)?))
            .await?;

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(async move {
            loop {
                let raw = match session.recv().await {
                    Some(raw) => raw,
                    None => break,
                };
                let item = serde_json::from_slice::<JsonRpcMessage>(&raw)
                    .map_err(|e| FabricError::decode(format!("rpc stream item: {e}")))
                    .and_then(|msg| match msg {
                        JsonRpcMessage::Response(resp) => Ok(resp),
                        JsonRpcMessage::Request(req) => Err(FabricError::protocol(format!(
                            "unexpected request '{}' on rpc stream",
                            req.method
                        ))),
                    });
                match item {
                    Ok(response) => {
                        let last = is_last_fragment(&response);
                        if tx.send(Ok(response)).await.is_err() {
                            debug!("rpc stream consumer dropped, cancelling session");
                            break;
                        }
                        if last {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
            session.close();
        });

        Ok(rx)
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

/// A streamed response whose result carries `"last": true` ends the
/// stream; error responses always do.
fn is_last_fragment(response: &JsonRpcResponse) -> bool {
    if response.is_error() {
        return true;
    }
    response
        .result
        .as_ref()
        .and_then(|r| r.get("last"))
        .and_then(|l| l.as_bool())
        .unwrap_or(false)
}
