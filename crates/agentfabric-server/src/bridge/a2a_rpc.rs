//! A2A over native SLIM RPC.
//!
//! The bridge owns its own authenticated SLIM connection bound to the
//! configured identity. Each inbound frame is a bare JSON-RPC request;
//! unary requests get one reply on the same session, `message/stream`
//! requests get ordered fragments written back as the handler produces
//! them, with backpressure from the transport write.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use agentfabric_core::protocol::a2a_methods;
use agentfabric_core::{
    FabricError, JsonRpcRequest, Result, SlimRpcConnectionConfig, Topic,
};
use agentfabric_transport::{
    FrameHandler, MessageContext, PublishOptions, SlimTransport, Subscription, Transport,
};

use crate::bridge::{Bridge, BridgeKind};
use crate::engine::A2aEngine;

/// Server side of the native SLIM RPC path.
pub struct A2aSlimRpcBridge {
    engine: Arc<A2aEngine>,
    config: SlimRpcConnectionConfig,
    identity: Topic,
    state: Mutex<Option<RpcState>>,
}

struct RpcState {
    transport: Arc<dyn Transport>,
    subscription: Subscription,
}

impl A2aSlimRpcBridge {
    pub fn new(engine: Arc<A2aEngine>, config: SlimRpcConnectionConfig) -> Self {
        let identity = config.identity.clone();
        Self {
            engine,
            config,
            identity,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Bridge for A2aSlimRpcBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::A2aSlimRpc
    }

    fn topic(&self) -> Option<&Topic> {
        Some(&self.identity)
    }

    async fn start(&self) -> Result<()> {
        let transport: Arc<dyn Transport> =
            Arc::new(SlimTransport::connect(self.config.connection()).await?);
        let handler = Arc::new(RpcHandler {
            engine: Arc::clone(&self.engine),
            transport: Arc::clone(&transport),
        });
        let subscription = transport.subscribe(self.identity.clone(), handler).await?;
        info!(identity = %self.identity, "a2a slim-rpc server bound");
        *self.state.lock().expect("state lock poisoned") = Some(RpcState {
            transport,
            subscription,
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let state = self.state.lock().expect("state lock poisoned").take();
        if let Some(state) = state {
            state.subscription.close();
            state.transport.close().await?;
        }
        Ok(())
    }
}

struct RpcHandler {
    engine: Arc<A2aEngine>,
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl FrameHandler for RpcHandler {
    async fn on_frame(&self, payload: Bytes, ctx: MessageContext) -> Result<()> {
        let request: JsonRpcRequest = serde_json::from_slice(&payload)
            .map_err(|e| FabricError::decode(format!("rpc request: {e}")))?;
        let token = ctx
            .reply
            .ok_or_else(|| FabricError::protocol("rpc request carries no reply route"))?;
        let peer = ctx
            .sender
            .clone()
            .ok_or_else(|| FabricError::protocol("rpc request carries no sender identity"))?;

        if request.method == a2a_methods::MESSAGE_STREAM {
            let mut fragments = self.engine.handle_streaming(request);
            let transport = Arc::clone(&self.transport);
            let target = peer.clone();
            tokio::spawn(async move {
                while let Some(response) = fragments.recv().await {
                    let payload = match serde_json::to_vec(&response) {
                        Ok(raw) => Bytes::from(raw),
                        Err(e) => {
                            warn!(%e, "failed to encode stream fragment");
                            continue;
                        }
                    };
                    // Awaiting the publish is the backpressure point:
                    // fragments stay ordered and never pile up unsent.
                    if let Err(e) = transport
                        .publish(
                            target.clone(),
                            payload,
                            PublishOptions::reply_to(token.clone()),
                        )
                        .await
                    {
                        debug!(%e, "stream consumer gone, cancelling handler");
                        break;
                    }
                }
            });
            return Ok(());
        }

        let response = self.engine.handle_request(request).await;
        let payload = Bytes::from(serde_json::to_vec(&response)?);
        self.transport
            .publish(peer, payload, PublishOptions::reply_to(token))
            .await
    }
}
