//! In-process message fabric for integration tests.
//!
//! Plays the role of a message fabric node entirely in memory: topics,
//! request/reply correlation by session id, broadcast fan-out, and
//! moderated group chat with invites. Each connected transport gets its
//! own endpoint queue; routing happens over channels, so the bridge and
//! client stacks can be exercised end to end without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agentfabric_core::{FabricError, Result, Topic};
use agentfabric_transport::{
    FrameHandler, MessageContext, PublishOptions, ReplyToken, Subscription, Transport,
    TransportKind, TransportSession,
};

const QUEUE_CAPACITY: usize = 64;
const SESSION_CAPACITY: usize = 32;

#[derive(Clone)]
struct FrameHeader {
    id: Uuid,
    sender: Topic,
    group: bool,
}

enum Delivery {
    Frame {
        header: FrameHeader,
        topic: Topic,
        payload: Bytes,
    },
    Invite {
        channel: Topic,
        session: Uuid,
    },
}

#[derive(Default)]
struct FabricCore {
    endpoints: Mutex<HashMap<Topic, mpsc::Sender<Delivery>>>,
    subscriptions: Mutex<HashMap<Topic, Vec<Topic>>>,
    groups: Mutex<HashMap<Uuid, Vec<Topic>>>,
}

/// Shared in-memory fabric; clone freely.
#[derive(Clone, Default)]
pub struct InMemoryFabric {
    core: Arc<FabricCore>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a transport under the given identity.
    pub fn connect(&self, identity: Topic) -> Arc<InMemoryTransport> {
        let (endpoint_tx, mut endpoint_rx) = mpsc::channel::<Delivery>(QUEUE_CAPACITY);
        let (invite_tx, invite_rx) = mpsc::channel::<(Topic, Uuid)>(QUEUE_CAPACITY);
        {
            let mut endpoints = self.core.endpoints.lock().unwrap();
            endpoints.insert(identity.clone(), endpoint_tx);
        }

        let state = Arc::new(TransportState {
            identity,
            subs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            invites: tokio::sync::Mutex::new(invite_rx),
            cancel: CancellationToken::new(),
        });

        // Dispatcher: routes endpoint deliveries exactly like a fabric
        // client would.
        let dispatch_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = dispatch_state.cancel.cancelled() => break,
                    delivery = endpoint_rx.recv() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                match delivery {
                    Delivery::Frame {
                        header,
                        topic,
                        payload,
                    } => {
                        dispatch_state.route_inbound(header, topic, payload).await;
                    }
                    Delivery::Invite { channel, session } => {
                        let _ = invite_tx.send((channel, session)).await;
                    }
                }
            }
        });

        Arc::new(InMemoryTransport {
            fabric: self.clone(),
            state,
        })
    }

    async fn route(&self, header: FrameHeader, topic: Topic, payload: Bytes) {
        let targets: Vec<mpsc::Sender<Delivery>> = if header.group {
            let members = self
                .core
                .groups
                .lock()
                .unwrap()
                .get(&header.id)
                .cloned()
                .unwrap_or_default();
            let endpoints = self.core.endpoints.lock().unwrap();
            members
                .iter()
                .filter(|m| **m != header.sender)
                .filter_map(|m| endpoints.get(m).cloned())
                .collect()
        } else {
            let mut identities = self
                .core
                .subscriptions
                .lock()
                .unwrap()
                .get(&topic)
                .cloned()
                .unwrap_or_default();
            if !identities.contains(&topic) {
                identities.push(topic.clone());
            }
            let endpoints = self.core.endpoints.lock().unwrap();
            identities
                .iter()
                .filter_map(|m| endpoints.get(m).cloned())
                .collect()
        };
        for target in targets {
            let _ = target
                .send(Delivery::Frame {
                    header: header.clone(),
                    topic: topic.clone(),
                    payload: payload.clone(),
                })
                .await;
        }
    }

    async fn invite(&self, channel: Topic, session: Uuid, moderator: Topic, participants: Vec<Topic>) {
        {
            let mut groups = self.core.groups.lock().unwrap();
            // Moderator first: fan-out order then guarantees the
            // moderator observes causes before their effects.
            let mut members = vec![moderator];
            members.extend(participants.clone());
            groups.insert(session, members);
        }
        let endpoints: Vec<mpsc::Sender<Delivery>> = {
            let endpoints = self.core.endpoints.lock().unwrap();
            participants
                .iter()
                .filter_map(|p| endpoints.get(p).cloned())
                .collect()
        };
        for endpoint in endpoints {
            let _ = endpoint
                .send(Delivery::Invite {
                    channel: channel.clone(),
                    session,
                })
                .await;
        }
    }
}

enum Pending {
    Reply(oneshot::Sender<Bytes>),
    Collector(mpsc::Sender<Bytes>),
    Session(mpsc::Sender<Bytes>),
}

struct TransportState {
    identity: Topic,
    subs: Mutex<HashMap<Topic, mpsc::Sender<(FrameHeader, Bytes)>>>,
    pending: Mutex<HashMap<Uuid, Pending>>,
    invites: tokio::sync::Mutex<mpsc::Receiver<(Topic, Uuid)>>,
    cancel: CancellationToken,
}

impl TransportState {
    async fn route_inbound(&self, header: FrameHeader, topic: Topic, payload: Bytes) {
        let resolved = {
            let mut pending = self.pending.lock().unwrap();
            if matches!(pending.get(&header.id), Some(Pending::Reply(_))) {
                match pending.remove(&header.id) {
                    Some(Pending::Reply(tx)) => Some(Ok(tx)),
                    _ => None,
                }
            } else {
                match pending.get(&header.id) {
                    Some(Pending::Collector(tx)) | Some(Pending::Session(tx)) => {
                        Some(Err(tx.clone()))
                    }
                    _ => None,
                }
            }
        };
        match resolved {
            Some(Ok(reply)) => {
                let _ = reply.send(payload);
            }
            Some(Err(persistent)) => {
                let _ = persistent.send(payload).await;
            }
            None => {
                let worker = {
                    let subs = self.subs.lock().unwrap();
                    subs.get(&topic).cloned()
                };
                if let Some(worker) = worker {
                    let _ = worker.send((header, payload)).await;
                }
            }
        }
    }
}

/// Transport handle over the in-memory fabric. Mirrors the SLIM client
/// semantics: session-id correlation, invites, group routing.
pub struct InMemoryTransport {
    fabric: InMemoryFabric,
    state: Arc<TransportState>,
}

impl InMemoryTransport {
    pub fn identity(&self) -> &Topic {
        &self.state.identity
    }

    fn header(&self, id: Uuid, group: bool) -> FrameHeader {
        FrameHeader {
            id,
            sender: self.state.identity.clone(),
            group,
        }
    }

    fn spawn_session_pump(
        &self,
        session_id: Uuid,
        target: Topic,
        group: bool,
        mut outbound: mpsc::Receiver<Bytes>,
        pipes_cancel: CancellationToken,
    ) {
        let fabric = self.fabric.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = pipes_cancel.cancelled() => break,
                    _ = state.cancel.cancelled() => break,
                    payload = outbound.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                let header = FrameHeader {
                    id: session_id,
                    sender: state.identity.clone(),
                    group,
                };
                fabric.route(header, target.clone(), payload).await;
            }
            let mut pending = state.pending.lock().unwrap();
            pending.remove(&session_id);
        });
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Slim
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::channel::<(FrameHeader, Bytes)>(QUEUE_CAPACITY);
        {
            let mut subs = self.state.subs.lock().unwrap();
            if subs.contains_key(&topic) {
                return Err(FabricError::transport(format!(
                    "already subscribed to {topic}"
                )));
            }
            subs.insert(topic.clone(), tx);
        }
        {
            let mut subscriptions = self.fabric.core.subscriptions.lock().unwrap();
            subscriptions
                .entry(topic.clone())
                .or_default()
                .push(self.state.identity.clone());
        }

        let cancel = self.state.cancel.child_token();
        let worker_cancel = cancel.clone();
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
                let _ = handler.on_frame(payload, ctx).await;
            }
        });

        Ok(Subscription::new(topic, cancel))
    }

    async fn publish(&self, topic: Topic, payload: Bytes, opts: PublishOptions) -> Result<()> {
        match opts.session {
            Some(ReplyToken::SlimSession { session, peer }) => {
                self.fabric
                    .route(self.header(session, false), peer, payload)
                    .await;
                Ok(())
            }
            Some(ReplyToken::NatsInbox { .. }) => {
                Err(FabricError::transport("foreign reply token"))
            }
            None => {
                self.fabric
                    .route(self.header(Uuid::new_v4(), false), topic, payload)
                    .await;
                Ok(())
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
            let mut pending = self.state.pending.lock().unwrap();
            pending.insert(id, Pending::Reply(tx));
        }
        self.fabric
            .route(self.header(id, false), topic.clone(), payload)
            .await;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(FabricError::Cancelled),
            Err(_) => {
                let mut pending = self.state.pending.lock().unwrap();
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
            let mut pending = self.state.pending.lock().unwrap();
            pending.insert(id, Pending::Collector(collect_tx));
        }
        let targets = if recipients.is_empty() {
            vec![topic]
        } else {
            recipients
        };
        for target in targets {
            self.fabric
                .route(self.header(id, false), target, payload.clone())
                .await;
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            let mut received = 0usize;
            while received < expected {
                let reply = tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
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
            let mut pending = state.pending.lock().unwrap();
            pending.remove(&id);
        });
        Ok(out_rx)
    }

    async fn open_session(&self, topic: Topic) -> Result<TransportSession> {
        let id = Uuid::new_v4();
        let (session, pipes) = TransportSession::channel(id, topic.clone(), SESSION_CAPACITY);
        {
            let mut pending = self.state.pending.lock().unwrap();
            pending.insert(id, Pending::Session(pipes.inbound));
        }
        self.spawn_session_pump(id, topic, false, pipes.outbound, pipes.cancel);
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
            let mut pending = self.state.pending.lock().unwrap();
            pending.insert(id, Pending::Session(pipes.inbound));
        }
        self.fabric
            .invite(
                channel.clone(),
                id,
                self.state.identity.clone(),
                participants,
            )
            .await;
        self.spawn_session_pump(id, channel, true, pipes.outbound, pipes.cancel);
        session.mark_active();
        Ok(session)
    }

    async fn accept_invite(&self, channel: Topic, timeout: Duration) -> Result<TransportSession> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut invites = self.state.invites.lock().await;
        loop {
            let (invite_channel, session_id) = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(FabricError::timeout(format!("invite for {channel}")));
                }
                invite = invites.recv() => match invite {
                    Some(invite) => invite,
                    None => return Err(FabricError::Cancelled),
                },
            };
            if invite_channel != channel {
                continue;
            }
            let (session, pipes) =
                TransportSession::channel(session_id, channel.clone(), SESSION_CAPACITY);
            {
                let mut pending = self.state.pending.lock().unwrap();
                pending.insert(session_id, Pending::Session(pipes.inbound));
            }
            self.spawn_session_pump(session_id, channel, true, pipes.outbound, pipes.cancel);
            session.mark_active();
            return Ok(session);
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.cancel.cancel();
        let mut pending = self.state.pending.lock().unwrap();
        pending.clear();
        Ok(())
    }
}
