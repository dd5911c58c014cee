//! # Agent Fabric Client
//!
//! Client-side factory and protocol clients.
//!
//! The factory inspects an [`AgentCard`](agentfabric_core::AgentCard),
//! intersects the transports it advertises with the ones the local
//! [`ClientConfig`](agentfabric_core::ClientConfig) can drive, and builds
//! the matching client:
//!
//! - `slimrpc` / `jsonrpc` → the standard unary [`A2aClient`];
//! - `slimpatterns` / `natspatterns` → [`A2aExperimentalClient`], which
//!   adds broadcast and group-chat operations on top of the base client.
//!
//! MCP clients open the memory-stream bridge in reverse over a transport
//! session; FastMCP clients run the streamable-HTTP handshake first.
//!
//! ```rust,no_run
//! use agentfabric_client::A2aClientFactory;
//! use agentfabric_core::{AgentCard, ClientConfig};
//!
//! # async fn run(card: AgentCard, config: ClientConfig) -> agentfabric_core::Result<()> {
//! let factory = A2aClientFactory::new(config);
//! let client = factory.create(card).await?;
//! let reply = client.send_message("hello there").await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod a2a;
pub mod factory;
pub mod fastmcp;
pub mod mcp;

pub use a2a::{A2aClient, A2aClientKind, A2aExperimentalClient, GroupChat};
pub use factory::{negotiate, A2aClientFactory, McpClientFactory};
pub use fastmcp::FastMcpHttpClient;
pub use mcp::McpClient;
