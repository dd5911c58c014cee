//! A2A engine: JSON-RPC dispatch onto a user handler.
//!
//! One engine instance backs every A2A bridge variant. It owns the agent
//! card and the handler, maps methods to handler calls, and converts
//! handler failures into JSON-RPC error responses so that a misbehaving
//! agent never tears down its bridge.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use agentfabric_core::a2a::{AgentCard, Message, MessageSendParams, StreamItem};
use agentfabric_core::protocol::a2a_methods;
use agentfabric_core::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Result};

use crate::handlers::{A2aHandler, EventSink};

const STREAM_CAPACITY: usize = 16;

/// Per-agent JSON-RPC dispatcher.
pub struct A2aEngine {
    card: Arc<AgentCard>,
    handler: Arc<dyn A2aHandler>,
}

impl A2aEngine {
    pub fn new(card: AgentCard, handler: Arc<dyn A2aHandler>) -> Self {
        Self {
            card: Arc::new(card),
            handler,
        }
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Run the handler for a bare message (group-chat relay path).
    pub async fn respond(&self, message: Message) -> Result<Message> {
        self.handler.on_message(message).await
    }

    /// Dispatch a unary request; always produces a response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            a2a_methods::MESSAGE_SEND => {
                let params: MessageSendParams = match request
                    .params
                    .ok_or_else(|| JsonRpcError::invalid_params(None))
                    .and_then(|raw| {
                        serde_json::from_value(raw)
                            .map_err(|e| JsonRpcError::invalid_params(Some(e.to_string())))
                    }) {
                    Ok(params) => params,
                    Err(err) => return JsonRpcResponse::error(err, id),
                };
                match self.handler.on_message(params.message).await {
                    Ok(reply) => match serde_json::to_value(reply) {
                        Ok(value) => JsonRpcResponse::success(value, id),
                        Err(e) => JsonRpcResponse::error(
                            JsonRpcError::internal_error(Some(e.to_string())),
                            id,
                        ),
                    },
                    Err(e) => {
                        debug!(%e, "handler rejected message");
                        JsonRpcResponse::error(e.to_jsonrpc_error(), id)
                    }
                }
            }
            other => JsonRpcResponse::error(JsonRpcError::method_not_found(other), id),
        }
    }

    /// Dispatch a `message/stream` request. Returns the ordered stream of
    /// responses; the final one carries `last: true`.
    pub fn handle_streaming(
        self: &Arc<Self>,
        request: JsonRpcRequest,
    ) -> mpsc::Receiver<JsonRpcResponse> {
        let (out_tx, out_rx) = mpsc::channel(STREAM_CAPACITY);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let id = request.id.clone();
            if request.method != a2a_methods::MESSAGE_STREAM {
                let _ = out_tx
                    .send(JsonRpcResponse::error(
                        JsonRpcError::method_not_found(&request.method),
                        id,
                    ))
                    .await;
                return;
            }
            let params: MessageSendParams = match request
                .params
                .ok_or_else(|| JsonRpcError::invalid_params(None))
                .and_then(|raw| {
                    serde_json::from_value(raw)
                        .map_err(|e| JsonRpcError::invalid_params(Some(e.to_string())))
                }) {
                Ok(params) => params,
                Err(err) => {
                    let _ = out_tx.send(JsonRpcResponse::error(err, id)).await;
                    return;
                }
            };

            let task_id = params
                .message
                .task_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let (event_tx, mut event_rx) = mpsc::channel::<Message>(STREAM_CAPACITY);

            let handler = Arc::clone(&engine.handler);
            let message = params.message;
            let handler_task = tokio::spawn(async move {
                handler
                    .on_message_stream(message, EventSink::new(event_tx))
                    .await
            });

            // Hold one event back so the final fragment can be marked
            // `last` without a sentinel frame.
            let mut previous: Option<Message> = None;
            while let Some(event) = event_rx.recv().await {
                if let Some(ready) = previous.replace(event) {
                    let item = StreamItem {
                        task_id: task_id.clone(),
                        message: Some(ready),
                        last: false,
                    };
                    let value = match serde_json::to_value(item) {
                        Ok(value) => value,
                        Err(_) => continue,
                    };
                    if out_tx
                        .send(JsonRpcResponse::success(value, id.clone()))
                        .await
                        .is_err()
                    {
                        // Client went away; the handler sees its sink close.
                        return;
                    }
                }
            }

            let response = match handler_task.await {
                Ok(Ok(())) => {
                    let item = StreamItem {
                        task_id,
                        message: previous,
                        last: true,
                    };
                    serde_json::to_value(item)
                        .map(|value| JsonRpcResponse::success(value, id.clone()))
                        .unwrap_or_else(|e| {
                            JsonRpcResponse::error(
                                JsonRpcError::internal_error(Some(e.to_string())),
                                id.clone(),
                            )
                        })
                }
                Ok(Err(e)) => JsonRpcResponse::error(e.to_jsonrpc_error(), id.clone()),
                Err(e) => JsonRpcResponse::error(
                    JsonRpcError::internal_error(Some(format!("handler panicked: {e}"))),
                    id.clone(),
                ),
            };
            let _ = out_tx.send(response).await;
        });
        out_rx
    }
}
