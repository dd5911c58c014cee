//! # Agent Fabric
//!
//! Transport-agnostic bridge/factory library for agent applications: the
//! same A2A and MCP semantics over SLIM, NATS, or HTTP.
//!
//! [`AgentFabric`] is the entry point. It builds connected transports,
//! server-side [`AppSession`] containers, and the protocol client
//! factories, and wires the tracing/identity hooks:
//!
//! ```rust,no_run
//! use agentfabric::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(handler: Arc<dyn A2aHandler>) -> agentfabric_core::Result<()> {
//! let fabric = AgentFabric::new();
//!
//! // Server side: one supervised A2A bridge over SLIM.
//! let identity: Topic = "default/default/weather_agent".parse()?;
//! let transport = fabric
//!     .transport(TransportConfig::Slim(SlimConnectionConfig::new(
//!         identity,
//!         std::env::var("SLIM_SHARED_SECRET").unwrap_or_default(),
//!     )))
//!     .await?;
//! let card = AgentCard::new(
//!     "Weather Agent",
//!     "1.0.0",
//!     "slim://default/default/weather_agent",
//!     TransportTag::SlimPatterns,
//! );
//! let session = fabric.app_session();
//! session
//!     .add(SessionTarget::A2a { handler, card })
//!     .with_transport(transport)
//!     .with_session_id("weather")
//!     .build()
//!     .await?;
//! session.start_all_sessions(true).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use agentfabric_client::{A2aClientFactory, McpClientFactory};
use agentfabric_core::{ClientConfig, Result};
use agentfabric_monitoring::{TracingConfig, TracingSystem};
use agentfabric_server::AppSession;
use agentfabric_transport::identity::IdentityConfig;
use agentfabric_transport::{create_transport, Transport, TransportConfig};

pub mod prelude;

pub use agentfabric_client as client;
pub use agentfabric_core as core;
pub use agentfabric_monitoring as monitoring;
pub use agentfabric_server as server;
pub use agentfabric_transport as transport;

/// Factory root: constructs transports, app sessions, and protocol client
/// factories, and exposes the tracing/identity hooks.
pub struct AgentFabric {
    identity: IdentityConfig,
}

impl Default for AgentFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentFabric {
    /// Factory with identity settings read from the environment.
    pub fn new() -> Self {
        Self {
            identity: IdentityConfig::from_env(),
        }
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    /// Install the tracing stack. Keep the returned system alive for the
    /// process lifetime.
    pub fn init_tracing(&self, config: TracingConfig) -> anyhow::Result<TracingSystem> {
        TracingSystem::init(config)
    }

    pub fn identity(&self) -> &IdentityConfig {
        &self.identity
    }

    /// Build a connected transport.
    pub async fn transport(&self, config: TransportConfig) -> Result<Arc<dyn Transport>> {
        create_transport(config).await
    }

    /// New supervised session container.
    pub fn app_session(&self) -> AppSession {
        AppSession::new()
    }

    /// A2A client factory negotiating against agent cards.
    pub fn a2a(&self, config: ClientConfig) -> A2aClientFactory {
        A2aClientFactory::new(config)
    }

    /// MCP client factory.
    pub fn mcp(&self) -> McpClientFactory {
        McpClientFactory::new()
    }
}
