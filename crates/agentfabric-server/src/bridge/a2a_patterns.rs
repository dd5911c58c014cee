//! A2A patterns bridge: pub/sub, fan-out, and group chat over a transport.
//!
//! The bridge subscribes on the agent's derived topic and dispatches each
//! inbound envelope by JSON-RPC method through the A2A engine. Unary and
//! broadcast requests are answered on the correlated reply route; a
//! `groupchat/init` request makes the bridge join the announced channel as
//! a participant and relay handler replies into it until the end token or
//! the deadline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use agentfabric_core::a2a::{GroupChatInitParams, Message};
use agentfabric_core::protocol::a2a_methods;
use agentfabric_core::{
    FabricError, JsonRpcMessage, JsonRpcResponse, PatternEnvelope, Result, Topic,
};
use agentfabric_transport::{
    FrameHandler, MessageContext, PublishOptions, Subscription, Transport,
};

use crate::bridge::{Bridge, BridgeKind};
use crate::engine::A2aEngine;

/// Server-side patterns bridge over SLIM or NATS.
pub struct A2aPatternsBridge {
    engine: Arc<A2aEngine>,
    transport: Arc<dyn Transport>,
    topic: Topic,
    subscription: Mutex<Option<Subscription>>,
}

impl A2aPatternsBridge {
    pub fn new(engine: Arc<A2aEngine>, transport: Arc<dyn Transport>, topic: Topic) -> Self {
        Self {
            engine,
            transport,
            topic,
            subscription: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Bridge for A2aPatternsBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::A2aPatterns
    }

    fn topic(&self) -> Option<&Topic> {
        Some(&self.topic)
    }

    async fn start(&self) -> Result<()> {
        let handler = Arc::new(PatternsHandler {
            engine: Arc::clone(&self.engine),
            transport: Arc::clone(&self.transport),
            topic: self.topic.clone(),
        });
        let subscription = self
            .transport
            .subscribe(self.topic.clone(), handler)
            .await?;
        info!(topic = %self.topic, "a2a patterns bridge subscribed");
        *self
            .subscription
            .lock()
            .expect("subscription lock poisoned") = Some(subscription);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(subscription) = self
            .subscription
            .lock()
            .expect("subscription lock poisoned")
            .take()
        {
            subscription.close();
        }
        Ok(())
    }
}

struct PatternsHandler {
    engine: Arc<A2aEngine>,
    transport: Arc<dyn Transport>,
    topic: Topic,
}

impl PatternsHandler {
    async fn reply(
        &self,
        envelope: &PatternEnvelope,
        ctx: &MessageContext,
        response: JsonRpcResponse,
    ) -> Result<()> {
        let reply_env = PatternEnvelope {
            from: self.topic.clone(),
            to: envelope.from.clone(),
            broadcast_group: envelope.broadcast_group.clone(),
            payload: JsonRpcMessage::Response(response),
        };
        let payload = reply_env.encode()?;
        match &ctx.reply {
            // Replies ride the correlated session/inbox; for broadcast
            // requests that is the broadcast group's reply route.
            Some(token) => {
                self.transport
                    .publish(
                        envelope.from.clone(),
                        payload,
                        PublishOptions::reply_to(token.clone()),
                    )
                    .await
            }
            None => {
                self.transport
                    .publish(envelope.from.clone(), payload, PublishOptions::default())
                    .await
            }
        }
    }
}

#[async_trait]
impl FrameHandler for PatternsHandler {
    async fn on_frame(&self, payload: Bytes, ctx: MessageContext) -> Result<()> {
        let envelope = PatternEnvelope::decode(&payload)?;
        let request = match &envelope.payload {
            JsonRpcMessage::Request(request) => request.clone(),
            JsonRpcMessage::Response(_) => {
                debug!(topic = %self.topic, "ignoring response envelope");
                return Ok(());
            }
        };

        if request.method == a2a_methods::GROUPCHAT_INIT {
            let params: GroupChatInitParams = request
                .params
                .clone()
                .ok_or_else(|| FabricError::protocol("groupchat/init missing params"))
                .and_then(|raw| {
                    serde_json::from_value(raw)
                        .map_err(|e| FabricError::decode(format!("groupchat/init params: {e}")))
                })?;

            let ack = JsonRpcResponse::success(
                serde_json::json!({"joined": true}),
                request.id.clone(),
            );
            self.reply(&envelope, &ctx, ack).await?;

            let engine = Arc::clone(&self.engine);
            let transport = Arc::clone(&self.transport);
            let topic = self.topic.clone();
            tokio::spawn(async move {
                if let Err(e) = participate(engine, transport, params).await {
                    warn!(%topic, %e, "group chat participation ended with error");
                }
            });
            return Ok(());
        }

        let response = self.engine.handle_request(request).await;
        self.reply(&envelope, &ctx, response).await
    }
}

/// Participant loop: join the channel, answer every relayed message, stop
/// on the end token or the deadline. Once the end token is seen (sent or
/// received) the participant leaves; in-flight messages after it are
/// dropped.
async fn participate(
    engine: Arc<A2aEngine>,
    transport: Arc<dyn Transport>,
    params: GroupChatInitParams,
) -> Result<()> {
    let timeout = Duration::from_secs(params.timeout_secs.max(1));
    let session = transport
        .accept_invite(params.channel.clone(), timeout)
        .await?;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let raw = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                debug!(channel = %params.channel, "group chat deadline reached");
                break;
            }
            raw = session.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        let message: Message = match serde_json::from_slice(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %params.channel, %e, "dropping undecodable group message");
                continue;
            }
        };
        if message.text() == params.end_message {
            break;
        }
        let reply = match engine.respond(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(channel = %params.channel, %e, "handler failed in group chat");
                continue;
            }
        };
        let done = reply.text() == params.end_message;
        session.send(Bytes::from(serde_json::to_vec(&reply)?)).await?;
        if done {
            break;
        }
    }
    session.close();
    Ok(())
}
