//! A2A over native SLIM RPC, end to end: a loopback SLIM node on a real
//! TCP listener, the RPC server bridge on one connection, the negotiated
//! client on another.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use agentfabric_client::{A2aClientFactory, A2aClientKind};
use agentfabric_core::a2a::{AgentCard, Message, TransportTag};
use agentfabric_core::{ClientConfig, Result, SlimRpcConnectionConfig, Topic};
use agentfabric_server::bridge::{A2aSlimRpcBridge, Bridge};
use agentfabric_server::{A2aEngine, A2aHandler};
use agentfabric_transport::slim::wire::{WireCodec, WireFrame};

const WEATHER_REPLY: &str = "The weather is sunny with a high of 75F.";

/// Minimal SLIM node: acks every identity, tracks subscriptions, and
/// forwards each publish to the topic's subscribers plus the connection
/// whose identity is the topic (the reply path).
struct LoopbackNode {
    connections: Mutex<HashMap<Topic, mpsc::Sender<WireFrame>>>,
    subscriptions: Mutex<HashMap<Topic, Vec<Topic>>>,
}

impl LoopbackNode {
    async fn spawn() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = Arc::new(LoopbackNode {
            connections: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        });
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let node = Arc::clone(&node);
                tokio::spawn(node.serve_connection(stream));
            }
        });
        addr
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream) {
        let mut framed = Framed::new(stream, WireCodec::default());

        let identity = match framed.next().await {
            Some(Ok(WireFrame::Hello { identity, .. })) => {
                let ack = WireFrame::HelloAck {
                    ok: true,
                    message: None,
                };
                if framed.send(ack).await.is_err() {
                    return;
                }
                identity
            }
            _ => return,
        };

        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(64);
        self.connections
            .lock()
            .unwrap()
            .insert(identity.clone(), out_tx);

        let (mut sink, mut stream) = framed.split();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match stream.next().await {
                Some(Ok(WireFrame::Subscribe { topic })) => {
                    self.subscriptions
                        .lock()
                        .unwrap()
                        .entry(topic)
                        .or_default()
                        .push(identity.clone());
                }
                Some(Ok(frame @ WireFrame::Publish { .. })) => {
                    self.forward(frame).await;
                }
                Some(Ok(WireFrame::Bye)) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
        self.connections.lock().unwrap().remove(&identity);
    }

    async fn forward(&self, frame: WireFrame) {
        let WireFrame::Publish { topic, .. } = &frame else {
            return;
        };
        let targets: Vec<mpsc::Sender<WireFrame>> = {
            let mut identities = self
                .subscriptions
                .lock()
                .unwrap()
                .get(topic)
                .cloned()
                .unwrap_or_default();
            if !identities.contains(topic) {
                identities.push(topic.clone());
            }
            let connections = self.connections.lock().unwrap();
            identities
                .iter()
                .filter_map(|id| connections.get(id).cloned())
                .collect()
        };
        for target in targets {
            let _ = target.send(frame.clone()).await;
        }
    }
}

struct Weather;

#[async_trait]
impl A2aHandler for Weather {
    async fn on_message(&self, _message: Message) -> Result<Message> {
        Ok(Message::agent_text(WEATHER_REPLY))
    }
}

fn weather_card() -> AgentCard {
    AgentCard::new(
        "Weather Agent",
        "1.0.0",
        "slim://default/default/weather_agent",
        TransportTag::SlimRpc,
    )
    .with_streaming(true)
}

async fn start_weather_bridge(endpoint: &str) -> A2aSlimRpcBridge {
    let identity: Topic = "default/default/weather_agent".parse().unwrap();
    let config = SlimRpcConnectionConfig::new(identity, "x".repeat(32))
        .with_endpoint(endpoint.to_string());
    let engine = Arc::new(A2aEngine::new(weather_card(), Arc::new(Weather)));
    let bridge = A2aSlimRpcBridge::new(engine, config);
    bridge.start().await.unwrap();
    bridge
}

fn client_config(endpoint: &str) -> ClientConfig {
    let identity: Topic = "default/default/rpc_client".parse().unwrap();
    ClientConfig::new()
        .with_slim_rpc(
            SlimRpcConnectionConfig::new(identity, "x".repeat(32))
                .with_endpoint(endpoint.to_string()),
        )
        .with_request_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_unary_a2a_over_slim_rpc() {
    let addr = LoopbackNode::spawn().await;
    let endpoint = format!("http://{addr}");
    let bridge = start_weather_bridge(&endpoint).await;

    let client = A2aClientFactory::new(client_config(&endpoint))
        .create(weather_card())
        .await
        .unwrap();
    assert!(matches!(client, A2aClientKind::Standard(_)));

    let reply = tokio::time::timeout(Duration::from_secs(5), client.send_message("hi"))
        .await
        .expect("reply within deadline")
        .unwrap();
    assert_eq!(reply.text(), WEATHER_REPLY);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_streaming_a2a_over_slim_rpc() {
    let addr = LoopbackNode::spawn().await;
    let endpoint = format!("http://{addr}");
    let bridge = start_weather_bridge(&endpoint).await;

    let client = match A2aClientFactory::new(client_config(&endpoint))
        .create(weather_card())
        .await
        .unwrap()
    {
        A2aClientKind::Standard(client) => client,
        A2aClientKind::Experimental(_) => panic!("slimrpc negotiates the standard client"),
    };

    let mut fragments = client
        .send_message_streaming(Message::user_text("hi"))
        .await
        .unwrap();
    let mut items = Vec::new();
    while let Some(item) = tokio::time::timeout(Duration::from_secs(5), fragments.recv())
        .await
        .expect("fragment within deadline")
    {
        items.push(item.unwrap());
    }
    assert_eq!(items.len(), 1);
    assert!(items[0].last);
    assert_eq!(items[0].message.as_ref().unwrap().text(), WEATHER_REPLY);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_surfaces_as_jsonrpc_error_over_slim_rpc() {
    struct Offline;

    #[async_trait]
    impl A2aHandler for Offline {
        async fn on_message(&self, _message: Message) -> Result<Message> {
            Err(agentfabric_core::FabricError::handler("agent offline"))
        }
    }

    let addr = LoopbackNode::spawn().await;
    let endpoint = format!("http://{addr}");

    let identity: Topic = "default/default/weather_agent".parse().unwrap();
    let config = SlimRpcConnectionConfig::new(identity, "x".repeat(32))
        .with_endpoint(endpoint.clone());
    let engine = Arc::new(A2aEngine::new(weather_card(), Arc::new(Offline)));
    let bridge = A2aSlimRpcBridge::new(engine, config);
    bridge.start().await.unwrap();

    let client = A2aClientFactory::new(client_config(&endpoint))
        .create(weather_card())
        .await
        .unwrap();
    let err = client.send_message("hi").await.unwrap_err();
    assert!(matches!(
        err,
        agentfabric_core::FabricError::Handler { .. }
    ));
    assert!(err.to_string().contains("agent offline"));

    bridge.shutdown().await.unwrap();
}
