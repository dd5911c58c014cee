//! A2A clients: standard unary, and the experimental patterns client with
//! broadcast and group chat.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use agentfabric_core::a2a::{
    AgentCard, GroupChatInitParams, Message, MessageSendParams, StreamItem,
};
use agentfabric_core::protocol::a2a_methods;
use agentfabric_core::{
    FabricError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PatternEnvelope, RequestId,
    Result, Topic,
};
use agentfabric_transport::{SlimRpcChannel, Transport, TransportSession};

const STREAM_CAPACITY: usize = 16;

/// Result of client negotiation: the variant matches the chosen transport.
pub enum A2aClientKind {
    Standard(A2aClient),
    Experimental(A2aExperimentalClient),
}

impl std::fmt::Debug for A2aClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            A2aClientKind::Standard(_) => f.write_str("A2aClientKind::Standard(..)"),
            A2aClientKind::Experimental(_) => f.write_str("A2aClientKind::Experimental(..)"),
        }
    }
}

impl A2aClientKind {
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Message> {
        match self {
            A2aClientKind::Standard(client) => client.send_message(text).await,
            A2aClientKind::Experimental(client) => client.send_message(text).await,
        }
    }

    pub fn experimental(self) -> Option<A2aExperimentalClient> {
        match self {
            A2aClientKind::Experimental(client) => Some(client),
            A2aClientKind::Standard(_) => None,
        }
    }
}

enum Backend {
    Rpc(SlimRpcChannel),
    Http {
        http: reqwest::Client,
        url: String,
        next_id: AtomicI64,
    },
}

/// Standard unary A2A client (`slimrpc` or `jsonrpc`).
pub struct A2aClient {
    backend: Backend,
    card: Arc<AgentCard>,
}

impl A2aClient {
    pub fn rpc(channel: SlimRpcChannel, card: AgentCard) -> Self {
        Self {
            backend: Backend::Rpc(channel),
            card: Arc::new(card),
        }
    }

    pub fn http(url: impl Into<String>, card: AgentCard, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FabricError::connect(format!("http client: {e}")))?;
        Ok(Self {
            backend: Backend::Http {
                http,
                url: url.into(),
                next_id: AtomicI64::new(1),
            },
            card: Arc::new(card),
        })
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<Message> {
        self.send(Message::user_text(text)).await
    }

    pub async fn send(&self, message: Message) -> Result<Message> {
        let params = serde_json::to_value(MessageSendParams { message })?;
        let response = match &self.backend {
            Backend::Rpc(channel) => channel.call(a2a_methods::MESSAGE_SEND, Some(params)).await?,
            Backend::Http { http, url, next_id } => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let request = JsonRpcRequest::new(
                    a2a_methods::MESSAGE_SEND,
                    Some(params),
                    Some(RequestId::number(id)),
                );
                let raw = http
                    .post(url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| FabricError::transport(format!("http post: {e}")))?;
                raw.json::<JsonRpcResponse>()
                    .await
                    .map_err(|e| FabricError::decode(format!("http response: {e}")))?
            }
        };
        message_from_response(response)
    }

    /// Streamed reply; requires the card's `streaming` capability and the
    /// native RPC path.
    pub async fn send_message_streaming(
        &self,
        message: Message,
    ) -> Result<mpsc::Receiver<Result<StreamItem>>> {
        if !self.card.capabilities.streaming {
            return Err(FabricError::unsupported(format!(
                "agent '{}' does not stream",
                self.card.name
            )));
        }
        let channel = match &self.backend {
            Backend::Rpc(channel) => channel,
            Backend::Http { .. } => {
                return Err(FabricError::unsupported(
                    "streaming over plain http json-rpc",
                ));
            }
        };
        let params = serde_json::to_value(MessageSendParams { message })?;
        let mut fragments = channel
            .call_streaming(a2a_methods::MESSAGE_STREAM, Some(params))
            .await?;

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(async move {
            while let Some(fragment) = fragments.recv().await {
                let item = fragment.and_then(|response| {
                    if let Some(error) = response.error {
                        return Err(FabricError::handler(error.message));
                    }
                    let value = response
                        .result
                        .ok_or_else(|| FabricError::protocol("stream fragment without result"))?;
                    serde_json::from_value::<StreamItem>(value)
                        .map_err(|e| FabricError::decode(format!("stream item: {e}")))
                });
                let stop = item.as_ref().map(|i| i.last).unwrap_or(true);
                if tx.send(item).await.is_err() || stop {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Patterns client: unary plus broadcast and group chat
/// (`slimpatterns` / `natspatterns`).
pub struct A2aExperimentalClient {
    transport: Arc<dyn Transport>,
    card: Arc<AgentCard>,
    identity: Topic,
    server_topic: Topic,
    timeout: Duration,
    next_id: AtomicI64,
}

impl A2aExperimentalClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        card: AgentCard,
        identity: Topic,
    ) -> Result<Self> {
        let server_topic = card.topic()?;
        if identity == server_topic {
            return Err(FabricError::protocol(
                "client identity must differ from the server topic",
            ));
        }
        Ok(Self {
            transport,
            card: Arc::new(card),
            identity,
            server_topic,
            timeout: Duration::from_secs(30),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    fn envelope(&self, to: Topic, request: JsonRpcRequest) -> PatternEnvelope {
        PatternEnvelope::new(self.identity.clone(), to, JsonRpcMessage::Request(request))
    }

    fn send_request(&self, message: Message) -> Result<JsonRpcRequest> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(JsonRpcRequest::new(
            a2a_methods::MESSAGE_SEND,
            Some(serde_json::to_value(MessageSendParams { message })?),
            Some(RequestId::number(id)),
        ))
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<Message> {
        self.send(Message::user_text(text)).await
    }

    pub async fn send(&self, message: Message) -> Result<Message> {
        let request = self.send_request(message)?;
        let envelope = self.envelope(self.server_topic.clone(), request);
        let raw = self
            .transport
            .request_reply(self.server_topic.clone(), envelope.encode()?, self.timeout)
            .await?;
        let reply = PatternEnvelope::decode(&raw)?;
        match reply.payload {
            JsonRpcMessage::Response(response) => message_from_response(response),
            JsonRpcMessage::Request(_) => {
                Err(FabricError::protocol("unexpected request in reply envelope"))
            }
        }
    }

    /// Fan out one message to the recipients of a broadcast group and
    /// collect replies. Partial results are returned on timeout.
    pub async fn broadcast_message(
        &self,
        group: Topic,
        recipients: Vec<Topic>,
        text: impl Into<String>,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>> {
        let mut rx = self
            .broadcast_message_streaming(group, recipients, text, expected, timeout)
            .await?;
        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(reply?);
        }
        Ok(replies)
    }

    /// Streaming form of [`broadcast_message`](Self::broadcast_message):
    /// replies are yielded as they arrive.
    pub async fn broadcast_message_streaming(
        &self,
        group: Topic,
        recipients: Vec<Topic>,
        text: impl Into<String>,
        expected: usize,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<Result<Message>>> {
        let request = self.send_request(Message::user_text(text))?;
        let envelope = self
            .envelope(group.clone(), request)
            .with_broadcast_group(group.clone());
        let mut raw_rx = self
            .transport
            .broadcast_streaming(group, envelope.encode()?, recipients, expected, timeout)
            .await?;

        let (tx, rx) = mpsc::channel(expected.max(1));
        tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                let reply = PatternEnvelope::decode(&raw).and_then(|env| match env.payload {
                    JsonRpcMessage::Response(response) => message_from_response(response),
                    JsonRpcMessage::Request(_) => {
                        Err(FabricError::protocol("unexpected request in broadcast reply"))
                    }
                });
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Initialize every participant and open the moderated channel.
    pub async fn start_groupchat(
        &self,
        channel: Topic,
        participants: Vec<Topic>,
        end_message: impl Into<String>,
        timeout: Duration,
    ) -> Result<GroupChat> {
        let end_message = end_message.into();
        let params = GroupChatInitParams {
            channel: channel.clone(),
            participants: participants.clone(),
            end_message: end_message.clone(),
            timeout_secs: timeout.as_secs().max(1),
        };
        // Participants must be waiting on the channel before invites fly.
        for participant in &participants {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let request = JsonRpcRequest::new(
                a2a_methods::GROUPCHAT_INIT,
                Some(serde_json::to_value(&params)?),
                Some(RequestId::number(id)),
            );
            let envelope = self.envelope(participant.clone(), request);
            let raw = self
                .transport
                .request_reply(participant.clone(), envelope.encode()?, self.timeout)
                .await?;
            let ack = PatternEnvelope::decode(&raw)?;
            if let JsonRpcMessage::Response(response) = ack.payload {
                if let Some(error) = response.error {
                    return Err(FabricError::handler(format!(
                        "participant {participant} refused group chat: {}",
                        error.message
                    )));
                }
            }
            debug!(%participant, "group chat participant joined");
        }

        let session = self
            .transport
            .start_groupchat(channel, participants)
            .await?;
        Ok(GroupChat {
            session,
            end_message,
            timeout,
        })
    }

    /// Group chat as a stream: opens the channel, says the opening line,
    /// and yields the conversation until the end token or the deadline.
    pub async fn start_streaming_groupchat(
        &self,
        channel: Topic,
        participants: Vec<Topic>,
        end_message: impl Into<String>,
        timeout: Duration,
        opening: impl Into<String>,
    ) -> Result<mpsc::Receiver<Message>> {
        let chat = self
            .start_groupchat(channel, participants, end_message, timeout)
            .await?;
        let opening = opening.into();
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(async move {
            chat.say(&opening).await.ok();
            loop {
                match chat.next_message().await {
                    Ok(Some(message)) => {
                        let done = message.text() == chat.end_message;
                        if tx.send(message).await.is_err() || done {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            chat.close();
        });
        Ok(rx)
    }
}

/// Moderator's handle on a running group chat.
pub struct GroupChat {
    session: TransportSession,
    end_message: String,
    timeout: Duration,
}

impl GroupChat {
    pub fn end_message(&self) -> &str {
        &self.end_message
    }

    /// Publish a message into the channel.
    pub async fn say(&self, text: &str) -> Result<()> {
        let message = Message::user_text(text);
        self.session
            .send(Bytes::from(serde_json::to_vec(&message)?))
            .await
    }

    /// Next message from the channel; `None` once the session ended.
    pub async fn next_message(&self) -> Result<Option<Message>> {
        loop {
            let raw = match self.session.recv().await {
                Some(raw) => raw,
                None => return Ok(None),
            };
            match serde_json::from_slice::<Message>(&raw) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(%e, "dropping undecodable group message");
                    continue;
                }
            }
        }
    }

    /// Drive the chat to completion: say the opening line, collect the
    /// transcript until the end token appears or the deadline passes, then
    /// close the session. The transcript is returned either way.
    pub async fn run(&self, opening: &str) -> Result<Vec<Message>> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        self.say(opening).await?;

        let mut transcript = Vec::new();
        loop {
            let message = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                message = self.next_message() => match message? {
                    Some(message) => message,
                    None => break,
                },
            };
            let done = message.text() == self.end_message;
            transcript.push(message);
            if done {
                break;
            }
        }
        self.close();
        Ok(transcript)
    }

    pub fn close(&self) {
        self.session.close();
    }
}

fn message_from_response(response: JsonRpcResponse) -> Result<Message> {
    if let Some(error) = response.error {
        return Err(FabricError::handler(error.message));
    }
    let value = response
        .result
        .ok_or_else(|| FabricError::protocol("response without result"))?;
    serde_json::from_value(value).map_err(|e| FabricError::decode(format!("a2a message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfabric_core::JsonRpcError;

    #[test]
    fn test_message_from_response_success() {
        let reply = Message::agent_text("hello");
        let response = JsonRpcResponse::success(
            serde_json::to_value(&reply).unwrap(),
            Some(RequestId::number(1)),
        );
        assert_eq!(message_from_response(response).unwrap().text(), "hello");
    }

    #[test]
    fn test_message_from_response_error() {
        let response = JsonRpcResponse::error(
            JsonRpcError::new(-32000, "agent offline"),
            Some(RequestId::number(1)),
        );
        let err = message_from_response(response).unwrap_err();
        assert!(matches!(err, FabricError::Handler { .. }));
    }
}
