//! SLIM transport: sessions, routes, and identity-authenticated frames.
//!
//! The transport is a client of an external SLIM node. One TCP connection
//! carries every session; a writer task owns the sink, a reader task
//! routes inbound frames to subscriptions (serialized per subscription),
//! pending request/reply awaiters, broadcast collectors, and open
//! sessions, all correlated by the session id in the frame header.
//!
//! Group chats are moderated: the moderator's `Invite` is relayed by the
//! node to each participant's connection, and every participant publish on
//! the group session lands on the channel regardless of the topic the
//! participant would otherwise address.

pub mod rpc;
pub mod wire;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use agentfabric_core::{FabricError, Result, SlimConnectionConfig, Topic};

use crate::backoff;
use crate::identity::auth_digest;
use crate::session::TransportSession;
use crate::{
    foreign_token_error, FrameHandler, MessageContext, PublishOptions, ReplyToken, Subscription,
    Transport, TransportKind,
};
use wire::{SessionHeader, SessionKind, WireCodec, WireFrame};

/// Byte stream a SLIM connection can ride on. TCP in production; tests may
/// hand in an in-memory duplex.
pub trait SlimIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SlimIo for T {}

const SESSION_CAPACITY: usize = 32;
const SUBSCRIPTION_CAPACITY: usize = 64;
const INVITE_CAPACITY: usize = 16;

enum PendingEntry {
    /// Single-shot request/reply awaiter.
    Reply(oneshot::Sender<Result<Bytes>>),
    /// Broadcast collector; persists until the collection window closes.
    Collector(mpsc::Sender<Bytes>),
    /// Inbound pipe of an open stream or group session.
    Session(mpsc::Sender<Bytes>),
}

struct SubscriptionEntry {
    tx: mpsc::Sender<(SessionHeader, Bytes)>,
    cancel: CancellationToken,
}

struct PendingInvite {
    channel: Topic,
    session: Uuid,
}

struct SlimInner {
    identity: Topic,
    outbound: mpsc::Sender<WireFrame>,
    subs: Mutex<HashMap<Topic, SubscriptionEntry>>,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    routes: Mutex<HashSet<Topic>>,
    invites: tokio::sync::Mutex<mpsc::Receiver<PendingInvite>>,
    cancel: CancellationToken,
}

impl SlimInner {
    async fn send_frame(&self, frame: WireFrame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| FabricError::transport("slim connection is closed"))
    }

    /// Set a route before the first publish to a topic.
    async fn ensure_route(&self, topic: &Topic) -> Result<()> {
        let newly_added = {
            let mut routes = self.routes.lock().expect("routes lock poisoned");
            routes.insert(topic.clone())
        };
        if newly_added {
            self.send_frame(WireFrame::Route {
                topic: topic.clone(),
            })
            .await?;
        }
        Ok(())
    }

    /// Fail every pending operation. Request/reply awaiters observe the
    /// given error; collectors and sessions see their streams end.
    fn fail_pending(&self, cancelled: bool) {
        let entries: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let PendingEntry::Reply(tx) = entry {
                let err = if cancelled {
                    FabricError::Cancelled
                } else {
                    FabricError::transport("slim connection lost")
                };
                let _ = tx.send(Err(err));
            }
            // Collector and Session entries close by drop.
        }
    }

    fn shutdown(&self, cancelled: bool) {
        self.cancel.cancel();
        self.fail_pending(cancelled);
        let subs: Vec<SubscriptionEntry> = {
            let mut subs = self.subs.lock().expect("subs lock poisoned");
            subs.drain().map(|(_, entry)| entry).collect()
        };
        for entry in subs {
            entry.cancel.cancel();
        }
    }
}

/// Transport over a SLIM node.
pub struct SlimTransport {
    inner: Arc<SlimInner>,
}

impl std::fmt::Debug for SlimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SlimTransport(..)")
    }
}

impl SlimTransport {
    /// Connect to the node named in the config, retrying with backoff.
    pub async fn connect(config: SlimConnectionConfig) -> Result<Self> {
        config.validate()?;
        let (host, port) = parse_endpoint(&config.endpoint)?;
        let stream = backoff::retry(
            config.max_retries,
            config.initial_backoff,
            "slim connect",
            || {
                let host = host.clone();
                async move {
                    TcpStream::connect((host.as_str(), port))
                        .await
                        .map_err(FabricError::from)
                }
            },
        )
        .await?;
        stream.set_nodelay(true).ok();
        Self::connect_io(Box::new(stream), config).await
    }

    /// Run the wire handshake over an established byte stream and spawn
    /// the connection tasks.
    pub async fn connect_io(io: Box<dyn SlimIo>, config: SlimConnectionConfig) -> Result<Self> {
        let mut framed = Framed::new(io, WireCodec::default());

        framed
            .send(WireFrame::Hello {
                identity: config.identity.clone(),
                auth: auth_digest(&config.identity, &config.shared_secret),
            })
            .await
            .map_err(|e| FabricError::connect(format!("slim handshake: {e}")))?;

        match framed.next().await {
            Some(Ok(WireFrame::HelloAck { ok: true, .. })) => {}
            Some(Ok(WireFrame::HelloAck { ok: false, message })) => {
                return Err(FabricError::connect(format!(
                    "slim node rejected identity: {}",
                    message.unwrap_or_default()
                )));
            }
            Some(Ok(frame)) => {
                return Err(FabricError::connect(format!(
                    "unexpected frame during handshake: {frame:?}"
                )));
            }
            Some(Err(e)) => return Err(FabricError::connect(format!("slim handshake: {e}"))),
            None => return Err(FabricError::connect("slim node closed during handshake")),
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireFrame>(SUBSCRIPTION_CAPACITY);
        let (invite_tx, invite_rx) = mpsc::channel::<PendingInvite>(INVITE_CAPACITY);
        let cancel = CancellationToken::new();

        let inner = Arc::new(SlimInner {
            identity: config.identity.clone(),
            outbound: outbound_tx,
            subs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashSet::new()),
            invites: tokio::sync::Mutex::new(invite_rx),
            cancel: cancel.clone(),
        });

        let (mut sink, mut stream) = framed.split();

        // Writer task: sole owner of the sink.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(frame).await {
                                warn!(%e, "slim write failed");
                                writer_cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        // Reader task: routes every inbound frame.
        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_inner.cancel.cancelled() => break,
                    frame = stream.next() => frame,
                };
                match frame {
                    Some(Ok(WireFrame::Publish {
                        header,
                        topic,
                        payload,
                    })) => {
                        route_inbound(&reader_inner, header, topic, Bytes::from(payload)).await;
                    }
                    Some(Ok(WireFrame::Invite {
                        channel, session, ..
                    })) => {
                        if invite_tx
                            .try_send(PendingInvite { channel, session })
                            .is_err()
                        {
                            warn!("dropping group-chat invite: invite queue full");
                        }
                    }
                    Some(Ok(WireFrame::SessionClose { session })) => {
                        let removed = {
                            let mut pending =
                                reader_inner.pending.lock().expect("pending lock poisoned");
                            pending.remove(&session)
                        };
                        if let Some(PendingEntry::Reply(tx)) = removed {
                            let _ = tx.send(Err(FabricError::Cancelled));
                        }
                    }
                    Some(Ok(WireFrame::Bye)) | None => {
                        debug!("slim connection closed by node");
                        reader_inner.shutdown(false);
                        break;
                    }
                    Some(Ok(frame)) => {
                        debug!(?frame, "ignoring unexpected slim frame");
                    }
                    Some(Err(e)) => {
                        error!(%e, "slim read failed");
                        reader_inner.shutdown(false);
                        break;
                    }
                }
            }
        });

        Ok(Self { inner })
    }

    fn header(&self, id: Uuid, kind: SessionKind) -> SessionHeader {
        SessionHeader::new(id, kind, self.inner.identity.clone())
    }

    /// Spawn the pump forwarding a session's outbound payloads to the
    /// node as group/stream publishes.
    fn spawn_session_pump(
        &self,
        session_id: Uuid,
        kind: SessionKind,
        target: Topic,
        mut pipes_outbound: mpsc::Receiver<Bytes>,
        pipes_cancel: CancellationToken,
        reply: bool,
    ) {
        let inner = Arc::clone(&self.inner);
        let sender = self.inner.identity.clone();
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = pipes_cancel.cancelled() => break,
                    _ = inner.cancel.cancelled() => break,
                    payload = pipes_outbound.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                let header = SessionHeader {
                    id: session_id,
                    kind,
                    sender: sender.clone(),
                    reply,
                };
                let frame = WireFrame::Publish {
                    header,
                    topic: target.clone(),
                    payload: payload.to_vec(),
                };
                if inner.send_frame(frame).await.is_err() {
                    break;
                }
            }
            let _ = inner
                .send_frame(WireFrame::SessionClose {
                    session: session_id,
                })
                .await;
            let mut pending = inner.pending.lock().expect("pending lock poisoned");
            pending.remove(&session_id);
        });
    }
}

/// Deliver an inbound publish to its pending entry or subscription.
async fn route_inbound(inner: &Arc<SlimInner>, header: SessionHeader, topic: Topic, payload: Bytes) {
    enum Target {
        Reply(oneshot::Sender<Result<Bytes>>),
        Persistent(mpsc::Sender<Bytes>),
        Subscription(mpsc::Sender<(SessionHeader, Bytes)>),
        None,
    }

    let from_pending = {
        let mut pending = inner.pending.lock().expect("pending lock poisoned");
        if matches!(pending.get(&header.id), Some(PendingEntry::Reply(_))) {
            match pending.remove(&header.id) {
                Some(PendingEntry::Reply(tx)) => Some(Target::Reply(tx)),
                _ => None,
            }
        } else {
            match pending.get(&header.id) {
                Some(PendingEntry::Collector(tx)) | Some(PendingEntry::Session(tx)) => {
                    Some(Target::Persistent(tx.clone()))
                }
                _ => None,
            }
        }
    };
    let target = match from_pending {
        Some(target) => target,
        None => {
            let subs = inner.subs.lock().expect("subs lock poisoned");
            match subs.get(&topic) {
                Some(entry) => Target::Subscription(entry.tx.clone()),
                None => Target::None,
            }
        }
    };

    match target {
        Target::Reply(tx) => {
            let _ = tx.send(Ok(payload));
        }
        Target::Persistent(tx) => {
            // Bounded send: a slow consumer suspends delivery for this
            // session only; the reader keeps serving others afterwards.
            if tx.send(payload).await.is_err() {
                debug!(session = %header.id, "session consumer gone, dropping frame");
            }
        }
        Target::Subscription(tx) => {
            if tx.send((header, payload)).await.is_err() {
                debug!(%topic, "subscription worker gone, dropping frame");
            }
        }
        Target::None => {
            debug!(%topic, session = %header.id, "no receiver for inbound frame, dropping");
        }
    }
}

#[async_trait]
impl Transport for SlimTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Slim
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::channel::<(SessionHeader, Bytes)>(SUBSCRIPTION_CAPACITY);
        let cancel = self.inner.cancel.child_token();
        {
            let mut subs = self.inner.subs.lock().expect("subs lock poisoned");
            if subs.contains_key(&topic) {
                return Err(FabricError::transport(format!(
                    "already subscribed to {topic}"
                )));
            }
            subs.insert(
                topic.clone(),
                SubscriptionEntry {
                    tx,
                    cancel: cancel.clone(),
                },
            );
        }
        self.inner
            .send_frame(WireFrame::Subscribe {
                topic: topic.clone(),
            })
            .await?;

        // Worker: handler invocations for this subscription run one at a
        // time, in arrival order.
        let worker_cancel = cancel.clone();
        let worker_topic = topic.clone();
        tokio::spawn(async move {
            loop {
                let (header, payload) = tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let ctx = MessageContext {
                    sender: Some(header.sender.clone()),
                    reply: Some(ReplyToken::SlimSession {
                        session: header.id,
                        peer: header.sender,
                    }),
                };
                if let Err(e) = handler.on_frame(payload, ctx).await {
                    if e.is_recoverable() {
                        warn!(topic = %worker_topic, %e, "handler error, frame dropped");
                    } else {
                        error!(topic = %worker_topic, %e, "handler failed");
                    }
                }
            }
        });

        Ok(Subscription::new(topic, cancel))
    }

    async fn publish(&self, topic: Topic, payload: Bytes, opts: PublishOptions) -> Result<()> {
        match opts.session {
            Some(ReplyToken::SlimSession { session, peer }) => {
                let header = SessionHeader::reply_to(
                    session,
                    SessionKind::RequestReply,
                    self.inner.identity.clone(),
                );
                self.inner
                    .send_frame(WireFrame::Publish {
                        header,
                        topic: peer,
                        payload: payload.to_vec(),
                    })
                    .await
            }
            Some(ReplyToken::NatsInbox { .. }) => Err(foreign_token_error(TransportKind::Slim)),
            None => {
                self.inner.ensure_route(&topic).await?;
                let header = self.header(Uuid::new_v4(), SessionKind::FireForget);
                self.inner
                    .send_frame(WireFrame::Publish {
                        header,
                        topic,
                        payload: payload.to_vec(),
                    })
                    .await
            }
        }
    }

    async fn request_reply(
        &self,
        topic: Topic,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.insert(id, PendingEntry::Reply(tx));
        }
        self.inner.ensure_route(&topic).await?;
        let header = self.header(id, SessionKind::RequestReply);
        self.inner
            .send_frame(WireFrame::Publish {
                header,
                topic: topic.clone(),
                payload: payload.to_vec(),
            })
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FabricError::Cancelled),
            Err(_) => {
                let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
                pending.remove(&id);
                Err(FabricError::timeout(format!("request_reply to {topic}")))
            }
        }
    }

    async fn broadcast_streaming(
        &self,
        topic: Topic,
        payload: Bytes,
        recipients: Vec<Topic>,
        expected: usize,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<Bytes>> {
        let id = Uuid::new_v4();
        let expected = if recipients.is_empty() {
            expected
        } else {
            expected.min(recipients.len())
        };
        let capacity = expected.max(1);
        let (collect_tx, mut collect_rx) = mpsc::channel::<Bytes>(capacity);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(capacity);
        {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.insert(id, PendingEntry::Collector(collect_tx));
        }
        // One collection session, one publish per recipient topic.
        let targets = if recipients.is_empty() {
            vec![topic]
        } else {
            recipients
        };
        for target in targets {
            self.inner.ensure_route(&target).await?;
            let header = self.header(id, SessionKind::RequestReply);
            self.inner
                .send_frame(WireFrame::Publish {
                    header,
                    topic: target,
                    payload: payload.to_vec(),
                })
                .await?;
        }

        // Collection window: forward up to `expected` replies until the
        // deadline, then release the pending entry.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            let mut received = 0usize;
            while received < expected {
                let reply = tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = inner.cancel.cancelled() => break,
                    reply = collect_rx.recv() => match reply {
                        Some(reply) => reply,
                        None => break,
                    },
                };
                received += 1;
                if out_tx.send(reply).await.is_err() {
                    break;
                }
            }
            let mut pending = inner.pending.lock().expect("pending lock poisoned");
            pending.remove(&id);
        });

        Ok(out_rx)
    }

    async fn open_session(&self, topic: Topic) -> Result<TransportSession> {
        let id = Uuid::new_v4();
        let (session, pipes) = TransportSession::channel(id, topic.clone(), SESSION_CAPACITY);
        {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.insert(id, PendingEntry::Session(pipes.inbound));
        }
        self.inner.ensure_route(&topic).await?;
        self.spawn_session_pump(
            id,
            SessionKind::Streaming,
            topic,
            pipes.outbound,
            pipes.cancel,
            false,
        );
        session.mark_active();
        Ok(session)
    }

    async fn start_groupchat(
        &self,
        channel: Topic,
        participants: Vec<Topic>,
    ) -> Result<TransportSession> {
        let id = Uuid::new_v4();
        let (session, pipes) = TransportSession::channel(id, channel.clone(), SESSION_CAPACITY);
        {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.insert(id, PendingEntry::Session(pipes.inbound));
        }
        self.inner.ensure_route(&channel).await?;
        self.inner
            .send_frame(WireFrame::Invite {
                channel: channel.clone(),
                moderator: self.inner.identity.clone(),
                session: id,
                participants,
            })
            .await?;
        self.spawn_session_pump(
            id,
            SessionKind::Group,
            channel,
            pipes.outbound,
            pipes.cancel,
            false,
        );
        session.mark_active();
        Ok(session)
    }

    async fn accept_invite(&self, channel: Topic, timeout: Duration) -> Result<TransportSession> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut invites = self.inner.invites.lock().await;
        loop {
            let invite = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(FabricError::timeout(format!("invite for {channel}")));
                }
                _ = self.inner.cancel.cancelled() => return Err(FabricError::Cancelled),
                invite = invites.recv() => match invite {
                    Some(invite) => invite,
                    None => return Err(FabricError::Cancelled),
                },
            };
            if invite.channel != channel {
                warn!(channel = %invite.channel, "dropping invite for unexpected channel");
                continue;
            }
            let (session, pipes) =
                TransportSession::channel(invite.session, channel.clone(), SESSION_CAPACITY);
            {
                let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
                pending.insert(invite.session, PendingEntry::Session(pipes.inbound));
            }
            self.inner.ensure_route(&channel).await?;
            // Participant publishes always land on the channel.
            self.spawn_session_pump(
                invite.session,
                SessionKind::Group,
                channel,
                pipes.outbound,
                pipes.cancel,
                false,
            );
            session.mark_active();
            return Ok(session);
        }
    }

    async fn close(&self) -> Result<()> {
        let _ = self.inner.send_frame(WireFrame::Bye).await;
        self.inner.shutdown(true);
        Ok(())
    }
}

fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let url = Url::parse(endpoint)
        .map_err(|e| FabricError::connect(format!("slim endpoint '{endpoint}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| FabricError::connect(format!("slim endpoint '{endpoint}' has no host")))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| FabricError::connect(format!("slim endpoint '{endpoint}' has no port")))?;
    Ok((host, port))
}
