//! Handler traits binding user agent logic to the bridges.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use agentfabric_core::a2a::Message;
use agentfabric_core::mcp::ToolCallResponse;
use agentfabric_core::{FabricError, Result};

/// Ordered sink for streamed agent events. Bounded: emitting suspends the
/// handler when the bridge has not yet flushed earlier events.
pub struct EventSink {
    tx: mpsc::Sender<Message>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| FabricError::Cancelled)
    }
}

/// User-supplied A2A agent implementation.
#[async_trait]
pub trait A2aHandler: Send + Sync {
    /// Answer one inbound message with one reply.
    async fn on_message(&self, message: Message) -> Result<Message>;

    /// Answer one inbound message with a stream of events. The default
    /// forwards the unary reply as a single event.
    async fn on_message_stream(&self, message: Message, events: EventSink) -> Result<()> {
        let reply = self.on_message(message).await?;
        events.emit(reply).await
    }
}

/// Handler for one registered MCP tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, arguments: Option<Value>) -> Result<ToolCallResponse>;
}
