//! # Agent Fabric Transport
//!
//! Transport layer for Agent Fabric: the abstraction the bridges program
//! against, plus the two concrete fabrics it ships with.
//!
//! ## Transport options
//!
//! ### SLIM
//! A session-oriented, authenticated message fabric. Every operation rides
//! a SLIM session (fire-and-forget, request/reply, streaming, or group);
//! reply correlation uses the session id, group chats are moderated with
//! node-delivered invites, and identities are authenticated with a shared
//! secret during the wire handshake.
//!
//! ### NATS
//! A subject-based pub/sub broker. Topics map to dotted subjects, request
//! and reply correlate through a per-call inbox, and group chat is not
//! available (`start_groupchat` reports `Unsupported` at call time).
//!
//! ## The abstraction
//!
//! [`Transport`] exposes three usage patterns behind one object-safe
//! trait: point-to-point request/reply, fan-out broadcast, and moderated
//! group chat, plus the subscription and session primitives the bridges
//! build on. Capabilities a fabric lacks fail at call time rather than
//! through a separate type, so callers can hold any transport as
//! `Arc<dyn Transport>`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentfabric_core::{SlimConnectionConfig, Topic};
//! use agentfabric_transport::{create_transport, Transport, TransportConfig};
//!
//! # async fn run() -> agentfabric_core::Result<()> {
//! let identity = Topic::new("org", "ns", "client")?;
//! let config = TransportConfig::Slim(SlimConnectionConfig::new(identity, "s".repeat(32)));
//! let transport: Arc<dyn Transport> = create_transport(config).await?;
//!
//! let server: Topic = "org/ns/server".parse()?;
//! let reply = transport
//!     .request_reply(server, "ping".into(), std::time::Duration::from_secs(5))
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agentfabric_core::{FabricError, Result, Topic};

pub mod backoff;
pub mod identity;
pub mod nats;
pub mod session;
pub mod slim;

pub use nats::NatsTransport;
pub use session::{SessionState, TransportSession};
pub use slim::rpc::SlimRpcChannel;
pub use slim::SlimTransport;

use agentfabric_core::{NatsConnectionConfig, SlimConnectionConfig};

/// Which fabric a transport instance speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Slim,
    Nats,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Slim => "slim",
            TransportKind::Nats => "nats",
        }
    }
}

/// Reply-routing token carried by inbound frames.
///
/// SLIM correlates by session id, NATS by inbox subject; bridges hand the
/// token back to [`Transport::publish`] untouched.
#[derive(Debug, Clone)]
pub enum ReplyToken {
    SlimSession { session: uuid::Uuid, peer: Topic },
    NatsInbox { subject: String },
}

/// Context delivered alongside every inbound frame.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Authenticated sender identity, when the fabric carries one.
    pub sender: Option<Topic>,
    /// Token routing a reply back to the requester.
    pub reply: Option<ReplyToken>,
}

/// Receive callback for a subscription.
///
/// Invocations for one subscription are serialized in arrival order;
/// distinct subscriptions run in parallel.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, payload: Bytes, ctx: MessageContext) -> Result<()>;
}

/// Options for [`Transport::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Route the payload on an existing session instead of the topic.
    pub session: Option<ReplyToken>,
}

impl PublishOptions {
    pub fn reply_to(token: ReplyToken) -> Self {
        Self {
            session: Some(token),
        }
    }
}

/// Handle owning a live subscription; dropping or closing it stops the
/// receive worker.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(topic: Topic, cancel: CancellationToken) -> Self {
        Self { topic, cancel }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The transport abstraction: connect-once, then subscribe, publish,
/// request/reply, broadcast, sessions, and group chat.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Register a receive callback for every inbound frame on `topic`.
    /// Subscribing to the same topic twice on one transport instance is an
    /// error.
    async fn subscribe(&self, topic: Topic, handler: Arc<dyn FrameHandler>)
        -> Result<Subscription>;

    /// Fire-and-forget send.
    async fn publish(&self, topic: Topic, payload: Bytes, opts: PublishOptions) -> Result<()>;

    /// Send and await exactly one correlated reply.
    async fn request_reply(&self, topic: Topic, payload: Bytes, timeout: Duration)
        -> Result<Bytes>;

    /// Send one message and stream replies as they arrive, up to
    /// `expected` or until `timeout`. With a non-empty `recipients` list
    /// the payload goes to each recipient topic under one collection
    /// token; with an empty list it goes to `topic` and the fabric fans
    /// out. The receiver closes when collection ends; an under-count is
    /// not an error.
    async fn broadcast_streaming(
        &self,
        topic: Topic,
        payload: Bytes,
        recipients: Vec<Topic>,
        expected: usize,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<Bytes>>;

    /// Collected form of [`broadcast_streaming`](Self::broadcast_streaming):
    /// partial results on timeout, never an error for fewer replies.
    async fn broadcast(
        &self,
        topic: Topic,
        payload: Bytes,
        recipients: Vec<Topic>,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<Bytes>> {
        let mut rx = self
            .broadcast_streaming(topic, payload, recipients, expected, timeout)
            .await?;
        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(reply);
        }
        Ok(replies)
    }

    /// Open a long-lived bidirectional point-to-point stream.
    async fn open_session(&self, topic: Topic) -> Result<TransportSession>;

    /// Open a moderated multi-party session and invite the participants.
    async fn start_groupchat(
        &self,
        channel: Topic,
        participants: Vec<Topic>,
    ) -> Result<TransportSession>;

    /// Wait for a group-chat invite on `channel` and join it.
    async fn accept_invite(&self, channel: Topic, timeout: Duration) -> Result<TransportSession>;

    /// Terminate all subscriptions and pending operations; pending
    /// awaiters fail with `Cancelled`.
    async fn close(&self) -> Result<()>;
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Slim(SlimConnectionConfig),
    Nats(NatsConnectionConfig),
}

/// Create a connected transport from configuration.
pub async fn create_transport(config: TransportConfig) -> Result<Arc<dyn Transport>> {
    match config {
        TransportConfig::Slim(config) => {
            let transport = SlimTransport::connect(config).await?;
            Ok(Arc::new(transport))
        }
        TransportConfig::Nats(config) => {
            let transport = NatsTransport::connect(config).await?;
            Ok(Arc::new(transport))
        }
    }
}

/// Helper shared by the concrete transports to reject a reply token minted
/// by a different fabric.
pub(crate) fn foreign_token_error(kind: TransportKind) -> FabricError {
    FabricError::transport(format!(
        "reply token was not issued by the {} transport",
        kind.name()
    ))
}
