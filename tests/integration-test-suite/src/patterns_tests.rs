//! A2A patterns scenarios over the in-process fabric: unary send,
//! broadcast fan-out, and moderated group chat.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agentfabric_client::A2aExperimentalClient;
use agentfabric_core::a2a::{AgentCard, Message, Role, TransportTag};
use agentfabric_core::{FabricError, Result, Topic};
use agentfabric_server::{A2aHandler, AppSession, SessionTarget};
use agentfabric_transport::Transport;

use crate::fabric::InMemoryFabric;

fn topic(name: &str) -> Topic {
    Topic::new("default", "default", name).unwrap()
}

fn card_for(name: &str) -> AgentCard {
    AgentCard::new(
        name,
        "1.0.0",
        format!("slim://default/default/{name}"),
        TransportTag::SlimPatterns,
    )
}

struct Weather;

#[async_trait]
impl A2aHandler for Weather {
    async fn on_message(&self, _message: Message) -> Result<Message> {
        Ok(Message::agent_text(
            "The weather is sunny with a high of 75F.",
        ))
    }
}

/// Replies with its own name; used to tell broadcast responders apart.
struct NamedStatus {
    name: String,
}

#[async_trait]
impl A2aHandler for NamedStatus {
    async fn on_message(&self, _message: Message) -> Result<Message> {
        Ok(Message::agent_text(format!("{} ready", self.name)))
    }
}

async fn start_agent(
    fabric: &InMemoryFabric,
    name: &str,
    handler: Arc<dyn A2aHandler>,
) -> AppSession {
    let transport: Arc<dyn Transport> = fabric.connect(topic(name));
    let session = AppSession::new();
    session
        .add(SessionTarget::A2a {
            handler,
            card: card_for(name),
        })
        .with_transport(transport)
        .with_session_id(name)
        .build()
        .await
        .unwrap();
    session.start_all_sessions(false).await.unwrap();
    session
}

fn client_for(fabric: &InMemoryFabric, server: &str) -> A2aExperimentalClient {
    let identity = topic("client");
    let transport: Arc<dyn Transport> = fabric.connect(identity.clone());
    A2aExperimentalClient::new(transport, card_for(server), identity)
        .unwrap()
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_unary_send_over_patterns() {
    let fabric = InMemoryFabric::new();
    let _server = start_agent(&fabric, "weather_agent", Arc::new(Weather)).await;
    let client = client_for(&fabric, "weather_agent");

    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        client.send_message("hi"),
    )
    .await
    .expect("reply within deadline")
    .unwrap();
    assert_eq!(reply.text(), "The weather is sunny with a high of 75F.");
    assert_eq!(reply.role, Role::Agent);
}

#[tokio::test]
async fn test_broadcast_collects_all_replies() {
    let fabric = InMemoryFabric::new();
    let mut servers = Vec::new();
    for name in ["agent1", "agent2", "agent3"] {
        servers.push(
            start_agent(
                &fabric,
                name,
                Arc::new(NamedStatus {
                    name: name.to_string(),
                }),
            )
            .await,
        );
    }
    let client = client_for(&fabric, "agent1");

    let replies = client
        .broadcast_message(
            topic("fleet"),
            vec![topic("agent1"), topic("agent2"), topic("agent3")],
            "Status check",
            3,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(replies.len(), 3);
    let mut texts: Vec<String> = replies.iter().map(|m| m.text()).collect();
    texts.sort();
    assert_eq!(texts, vec!["agent1 ready", "agent2 ready", "agent3 ready"]);
}

#[tokio::test]
async fn test_broadcast_returns_partial_results_on_timeout() {
    let fabric = InMemoryFabric::new();
    let _one = start_agent(&fabric, "agent1", Arc::new(Weather)).await;
    let _two = start_agent(&fabric, "agent2", Arc::new(Weather)).await;
    // agent3 is offline.
    let client = client_for(&fabric, "agent1");

    let replies = client
        .broadcast_message(
            topic("fleet"),
            vec![topic("agent1"), topic("agent2"), topic("agent3")],
            "Status check",
            3,
            Duration::from_millis(800),
        )
        .await
        .unwrap();
    assert_eq!(replies.len(), 2);
}

/// Answers moderator questions; stays quiet on agent chatter.
struct Courier;

#[async_trait]
impl A2aHandler for Courier {
    async fn on_message(&self, message: Message) -> Result<Message> {
        if message.role == Role::User {
            Ok(Message::agent_text("package picked up"))
        } else {
            Err(FabricError::handler("nothing to add"))
        }
    }
}

/// Announces delivery once it has seen the courier speak.
struct Dispatcher {
    seen: AtomicUsize,
}

#[async_trait]
impl A2aHandler for Dispatcher {
    async fn on_message(&self, _message: Message) -> Result<Message> {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= 2 {
            Ok(Message::agent_text("DELIVERED"))
        } else {
            Err(FabricError::handler("waiting for the courier"))
        }
    }
}

#[tokio::test]
async fn test_groupchat_terminates_on_end_message() {
    let fabric = InMemoryFabric::new();
    let _courier = start_agent(&fabric, "agent_a", Arc::new(Courier)).await;
    let _dispatcher = start_agent(
        &fabric,
        "agent_b",
        Arc::new(Dispatcher {
            seen: AtomicUsize::new(0),
        }),
    )
    .await;
    let client = client_for(&fabric, "agent_a");

    let chat = tokio::time::timeout(
        Duration::from_secs(5),
        client.start_groupchat(
            topic("chatroom"),
            vec![topic("agent_a"), topic("agent_b")],
            "DELIVERED",
            Duration::from_secs(5),
        ),
    )
    .await
    .expect("group chat opens within deadline")
    .unwrap();

    let transcript = tokio::time::timeout(
        Duration::from_secs(5),
        chat.run("Where is my package?"),
    )
    .await
    .expect("chat completes within deadline")
    .unwrap();

    assert!(!transcript.is_empty());
    assert_eq!(transcript.last().unwrap().text(), "DELIVERED");
    assert!(transcript.iter().any(|m| m.text() == "package picked up"));
}

#[tokio::test]
async fn test_duplicate_subscribe_is_rejected() {
    use agentfabric_transport::{FrameHandler, MessageContext};
    use bytes::Bytes;

    struct Sink;

    #[async_trait]
    impl FrameHandler for Sink {
        async fn on_frame(&self, _payload: Bytes, _ctx: MessageContext) -> Result<()> {
            Ok(())
        }
    }

    let fabric = InMemoryFabric::new();
    let transport = fabric.connect(topic("subscriber"));
    transport
        .subscribe(topic("shared"), Arc::new(Sink))
        .await
        .unwrap();
    let err = transport
        .subscribe(topic("shared"), Arc::new(Sink))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already subscribed"));
}

#[tokio::test]
async fn test_handler_replies_preserve_arrival_order() {
    struct Echo;

    #[async_trait]
    impl A2aHandler for Echo {
        async fn on_message(&self, message: Message) -> Result<Message> {
            Ok(Message::agent_text(message.text()))
        }
    }

    let fabric = InMemoryFabric::new();
    let _server = start_agent(&fabric, "echo_agent", Arc::new(Echo)).await;
    let client = client_for(&fabric, "echo_agent");

    for i in 0..10 {
        let text = format!("message {i}");
        let reply = client.send_message(text.clone()).await.unwrap();
        assert_eq!(reply.text(), text);
    }
}
