//! NATS transport: dotted subjects with inbox reply-to.
//!
//! Topics map to `org.namespace.name` subjects. Request/reply uses a fresh
//! inbox per call, broadcasts collect replies on a shared inbox, and
//! point-to-point sessions pin one inbox for their lifetime. Group chat is
//! not part of the NATS feature set; the operations report `Unsupported`
//! at call time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use agentfabric_core::{FabricError, NatsConnectionConfig, Result, Topic};

use crate::backoff;
use crate::session::TransportSession;
use crate::{
    foreign_token_error, FrameHandler, MessageContext, PublishOptions, ReplyToken, Subscription,
    Transport, TransportKind,
};

const SESSION_CAPACITY: usize = 32;

struct NatsInner {
    client: async_nats::Client,
    subs: Mutex<HashSet<Topic>>,
    cancel: CancellationToken,
}

/// Transport over a NATS broker.
pub struct NatsTransport {
    inner: Arc<NatsInner>,
}

impl NatsTransport {
    /// Connect to the broker, retrying with backoff.
    pub async fn connect(config: NatsConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        let client = backoff::retry(
            config.max_retries,
            config.initial_backoff,
            "nats connect",
            || {
                let endpoint = endpoint.clone();
                async move {
                    async_nats::connect(endpoint)
                        .await
                        .map_err(|e| FabricError::transport(e.to_string()))
                }
            },
        )
        .await?;

        Ok(Self {
            inner: Arc::new(NatsInner {
                client,
                subs: Mutex::new(HashSet::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    fn unsupported(operation: &str) -> FabricError {
        FabricError::unsupported(format!("{operation} is not available over nats"))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Nats
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Subscription> {
        {
            let mut subs = self.inner.subs.lock().expect("subs lock poisoned");
            if !subs.insert(topic.clone()) {
                return Err(FabricError::transport(format!(
                    "already subscribed to {topic}"
                )));
            }
        }
        let mut subscriber = self
            .inner
            .client
            .subscribe(topic.nats_subject())
            .await
            .map_err(|e| FabricError::transport(format!("nats subscribe: {e}")))?;

        let cancel = self.inner.cancel.child_token();
        let worker_cancel = cancel.clone();
        let worker_topic = topic.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    message = subscriber.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let ctx = MessageContext {
                    sender: None,
                    reply: message.reply.as_ref().map(|subject| ReplyToken::NatsInbox {
                        subject: subject.to_string(),
                    }),
                };
                // Handler calls are awaited in sequence: per-subscription
                // ordering is arrival order.
                if let Err(e) = handler.on_frame(message.payload, ctx).await {
                    if e.is_recoverable() {
                        warn!(topic = %worker_topic, %e, "handler error, frame dropped");
                    } else {
                        error!(topic = %worker_topic, %e, "handler failed");
                    }
                }
            }
            let _ = subscriber.unsubscribe().await;
            let mut subs = inner.subs.lock().expect("subs lock poisoned");
            subs.remove(&worker_topic);
        });

        Ok(Subscription::new(topic, cancel))
    }

    async fn publish(&self, topic: Topic, payload: Bytes, opts: PublishOptions) -> Result<()> {
        let subject = match opts.session {
            Some(ReplyToken::NatsInbox { subject }) => subject,
            Some(ReplyToken::SlimSession { .. }) => {
                return Err(foreign_token_error(TransportKind::Nats));
            }
            None => topic.nats_subject(),
        };
        self.inner
            .client
            .publish(subject, payload)
            .await
            .map_err(|e| FabricError::transport(format!("nats publish: {e}")))
    }

    async fn request_reply(
        &self,
        topic: Topic,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let subject = topic.nats_subject();
        match tokio::time::timeout(timeout, self.inner.client.request(subject, payload)).await {
            Ok(Ok(message)) => Ok(message.payload),
            Ok(Err(e)) => Err(FabricError::transport(format!("nats request: {e}"))),
            Err(_) => Err(FabricError::timeout(format!("request_reply to {topic}"))),
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
        let expected = if recipients.is_empty() {
            expected
        } else {
            expected.min(recipients.len())
        };
        let inbox = self.inner.client.new_inbox();
        let mut subscriber = self
            .inner
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| FabricError::transport(format!("nats subscribe inbox: {e}")))?;
        // One reply inbox shared by every recipient publish.
        let targets = if recipients.is_empty() {
            vec![topic]
        } else {
            recipients
        };
        for target in targets {
            self.inner
                .client
                .publish_with_reply(target.nats_subject(), inbox.clone(), payload.clone())
                .await
                .map_err(|e| FabricError::transport(format!("nats publish: {e}")))?;
        }

        let (out_tx, out_rx) = mpsc::channel(expected.max(1));
        let cancel = self.inner.cancel.child_token();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            let mut received = 0usize;
            while received < expected {
                let message = tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = cancel.cancelled() => break,
                    message = subscriber.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                received += 1;
                if out_tx.send(message.payload).await.is_err() {
                    break;
                }
            }
            let _ = subscriber.unsubscribe().await;
        });

        Ok(out_rx)
    }

    async fn open_session(&self, topic: Topic) -> Result<TransportSession> {
        let inbox = self.inner.client.new_inbox();
        let mut subscriber = self
            .inner
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| FabricError::transport(format!("nats subscribe inbox: {e}")))?;

        let (session, mut pipes) =
            TransportSession::channel(Uuid::new_v4(), topic.clone(), SESSION_CAPACITY);
        let client = self.inner.client.clone();
        let subject = topic.nats_subject();
        let cancel = self.inner.cancel.child_token();

        // Inbound pump: inbox messages into the session.
        let inbound = pipes.inbound;
        let inbound_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = inbound_cancel.cancelled() => break,
                    message = subscriber.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                if inbound.send(message.payload).await.is_err() {
                    break;
                }
            }
            let _ = subscriber.unsubscribe().await;
        });

        // Outbound pump: session sends to the peer, reply-to pinned to the
        // session inbox.
        let pipes_cancel = pipes.cancel;
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = pipes_cancel.cancelled() => break,
                    payload = pipes.outbound.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                if let Err(e) = client
                    .publish_with_reply(subject.clone(), inbox.clone(), payload)
                    .await
                {
                    debug!(%e, "nats session publish failed");
                    break;
                }
            }
        });

        session.mark_active();
        Ok(session)
    }

    async fn start_groupchat(
        &self,
        _channel: Topic,
        _participants: Vec<Topic>,
    ) -> Result<TransportSession> {
        Err(Self::unsupported("group chat"))
    }

    async fn accept_invite(&self, _channel: Topic, _timeout: Duration) -> Result<TransportSession> {
        Err(Self::unsupported("group chat"))
    }

    async fn close(&self) -> Result<()> {
        self.inner.cancel.cancel();
        self.inner
            .client
            .flush()
            .await
            .map_err(|e| FabricError::transport(format!("nats flush: {e}")))
    }
}
