//! MCP memory-stream bridge.
//!
//! Two bounded channels stand in for the stdio pipe a low-level MCP server
//! expects: the inbound pump feeds decoded transport frames into the
//! service's run loop, the outbound pump publishes every produced record
//! back on the reply route, in order, one stream id at a time. The service
//! loop terminates when both channels close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use agentfabric_core::{McpFrame, Result, Topic};
use agentfabric_transport::{
    FrameHandler, MessageContext, PublishOptions, ReplyToken, Subscription, Transport,
};

use crate::bridge::{Bridge, BridgeKind};
use crate::mcp::{McpService, StreamRecord};

/// Memory-stream channel capacity. Bounded so a stalled consumer
/// suspends its producer instead of buffering without limit.
const CHANNEL_CAPACITY: usize = 32;

/// Bridges one MCP service onto one transport subscription.
pub struct McpStreamBridge {
    service: Arc<McpService>,
    transport: Arc<dyn Transport>,
    topic: Topic,
    state: Mutex<Option<RunningState>>,
}

struct RunningState {
    subscription: Subscription,
}

/// Reply routes learned from inbound frames, keyed by stream id.
type ReplyRoutes = Arc<Mutex<HashMap<String, ReplyToken>>>;

impl McpStreamBridge {
    pub fn new(service: Arc<McpService>, transport: Arc<dyn Transport>, topic: Topic) -> Self {
        Self {
            service,
            transport,
            topic,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Bridge for McpStreamBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::McpStream
    }

    fn topic(&self) -> Option<&Topic> {
        Some(&self.topic)
    }

    async fn start(&self) -> Result<()> {
        let (in_tx, in_rx) = mpsc::channel::<StreamRecord>(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<StreamRecord>(CHANNEL_CAPACITY);
        let routes: ReplyRoutes = Arc::new(Mutex::new(HashMap::new()));

        // Service run loop: exclusive owner of (in_rx, out_tx).
        tokio::spawn(Arc::clone(&self.service).run(in_rx, out_tx));

        // Outbound pump: drains the service and publishes each record on
        // the stream's reply route, numbering frames per stream.
        let transport = Arc::clone(&self.transport);
        let pump_routes = Arc::clone(&routes);
        let pump_topic = self.topic.clone();
        tokio::spawn(async move {
            let mut seqs: HashMap<String, u64> = HashMap::new();
            while let Some(record) = out_rx.recv().await {
                let token = {
                    let routes = pump_routes.lock().expect("routes lock poisoned");
                    routes.get(&record.stream_id).cloned()
                };
                let Some(token) = token else {
                    warn!(stream = %record.stream_id, "no reply route for outbound record");
                    continue;
                };
                let seq = seqs.entry(record.stream_id.clone()).or_insert(0);
                let raw = match serde_json::to_vec(&record.message) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(%e, "failed to encode outbound mcp message");
                        continue;
                    }
                };
                let frame = McpFrame::new(record.stream_id.clone(), *seq, raw);
                *seq += 1;
                let payload = match frame.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(%e, "failed to encode mcp frame");
                        continue;
                    }
                };
                if let Err(e) = transport
                    .publish(pump_topic.clone(), payload, PublishOptions::reply_to(token))
                    .await
                {
                    debug!(%e, "mcp outbound publish failed, stopping pump");
                    break;
                }
            }
        });

        // Inbound side: the subscription handler is the other pump.
        let handler = Arc::new(StreamHandler { in_tx, routes });
        let subscription = self
            .transport
            .subscribe(self.topic.clone(), handler)
            .await?;
        info!(topic = %self.topic, server = %self.service.name(), "mcp stream bridge subscribed");
        *self.state.lock().expect("state lock poisoned") = Some(RunningState { subscription });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        // Closing the subscription drops the handler and with it the
        // inbound sender; the service loop and outbound pump drain and
        // stop on their own.
        if let Some(state) = self.state.lock().expect("state lock poisoned").take() {
            state.subscription.close();
        }
        Ok(())
    }
}

struct StreamHandler {
    in_tx: mpsc::Sender<StreamRecord>,
    routes: ReplyRoutes,
}

#[async_trait]
impl FrameHandler for StreamHandler {
    async fn on_frame(&self, payload: Bytes, ctx: MessageContext) -> Result<()> {
        let frame = McpFrame::decode(&payload)?;
        let message = frame.message()?;
        if let Some(token) = ctx.reply {
            let mut routes = self.routes.lock().expect("routes lock poisoned");
            routes.insert(frame.stream_id.clone(), token);
        }
        // Bounded send: the handler suspends while the service is busy,
        // which is the backpressure the memory stream exists to provide.
        self.in_tx
            .send(StreamRecord {
                stream_id: frame.stream_id,
                message,
            })
            .await
            .map_err(|_| agentfabric_core::FabricError::Cancelled)
    }
}
