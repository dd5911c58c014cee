//! Client factory: transport negotiation and client construction.

use std::sync::Arc;

use tracing::info;

use agentfabric_core::a2a::{AgentCard, TransportTag};
use agentfabric_core::{ClientConfig, FabricError, Result, Topic};
use agentfabric_transport::{
    NatsTransport, SlimRpcChannel, SlimTransport, Transport,
};

use crate::a2a::{A2aClient, A2aClientKind, A2aExperimentalClient};
use crate::fastmcp::FastMcpHttpClient;
use crate::mcp::McpClient;

/// Pick the transport for a card: the intersection of what the card
/// advertises and what the config can drive, ordered by the card's
/// preference. Deterministic for fixed inputs.
pub fn negotiate(card: &AgentCard, config: &ClientConfig) -> Result<TransportTag> {
    let local = config.supported_transports();
    card.supported_transports()
        .into_iter()
        .find(|tag| local.contains(tag))
        .ok_or_else(|| FabricError::NoCompatibleTransport {
            agent: card.name.clone(),
        })
}

/// Builds A2A clients from agent cards.
pub struct A2aClientFactory {
    config: ClientConfig,
}

impl A2aClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Negotiate a transport for the card and construct the matching
    /// client.
    pub async fn create(&self, card: AgentCard) -> Result<A2aClientKind> {
        card.validate()?;
        let tag = negotiate(&card, &self.config)?;
        info!(agent = %card.name, transport = %tag, "negotiated a2a transport");

        match tag {
            TransportTag::SlimRpc => {
                let rpc_config = self
                    .config
                    .slim_rpc
                    .clone()
                    .ok_or_else(|| FabricError::protocol("slim rpc config missing"))?;
                let server = card.topic()?;
                let channel = SlimRpcChannel::connect(rpc_config, server)
                    .await?
                    .with_timeout(self.config.request_timeout);
                Ok(A2aClientKind::Standard(A2aClient::rpc(channel, card)))
            }
            TransportTag::JsonRpc => {
                let client =
                    A2aClient::http(card.url.clone(), card, self.config.request_timeout)?;
                Ok(A2aClientKind::Standard(client))
            }
            TransportTag::SlimPatterns => {
                let slim_config = self
                    .config
                    .slim
                    .clone()
                    .ok_or_else(|| FabricError::protocol("slim config missing"))?;
                let identity = slim_config.identity.clone();
                let transport: Arc<dyn Transport> =
                    Arc::new(SlimTransport::connect(slim_config).await?);
                let client = A2aExperimentalClient::new(transport, card, identity)?
                    .with_timeout(self.config.request_timeout);
                Ok(A2aClientKind::Experimental(client))
            }
            TransportTag::NatsPatterns => {
                let nats_config = self
                    .config
                    .nats
                    .clone()
                    .ok_or_else(|| FabricError::protocol("nats config missing"))?;
                let identity = client_identity(&card)?;
                let transport: Arc<dyn Transport> =
                    Arc::new(NatsTransport::connect(nats_config).await?);
                let client = A2aExperimentalClient::new(transport, card, identity)?
                    .with_timeout(self.config.request_timeout);
                Ok(A2aClientKind::Experimental(client))
            }
        }
    }
}

/// NATS carries no authenticated identity; derive a unique client topic so
/// that sender and receiver identities stay distinct.
fn client_identity(card: &AgentCard) -> Result<Topic> {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Topic::new("default", "clients", format!("client_{suffix}")).map_err(|_| {
        FabricError::protocol(format!("cannot derive client identity for {}", card.name))
    })
}

/// Builds MCP clients.
#[derive(Default)]
pub struct McpClientFactory;

impl McpClientFactory {
    pub fn new() -> Self {
        Self
    }

    /// Open the memory-stream path to an MCP bridge on `topic`.
    pub async fn create_client(
        &self,
        topic: Topic,
        transport: Arc<dyn Transport>,
    ) -> Result<McpClient> {
        McpClient::connect(topic, transport).await
    }

    /// Connect to a FastMCP server over streamable HTTP; runs the
    /// two-POST handshake before returning.
    pub async fn create_http_client(&self, url: impl Into<String>) -> Result<FastMcpHttpClient> {
        FastMcpHttpClient::connect(url.into()).await
    }
}
