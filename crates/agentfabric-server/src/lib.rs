//! # Agent Fabric Server
//!
//! Server-side bridges and session supervision.
//!
//! A bridge binds a user-supplied agent implementation to one transport
//! subscription and one protocol engine, drives the receive loop, and
//! dispatches inbound frames to the handler. The [`AppSession`] supervisor
//! owns several bridges, starts them concurrently, and propagates
//! shutdown.
//!
//! ## Bridge variants
//!
//! | target | transport | bridge |
//! |---|---|---|
//! | SLIM RPC config | internal | A2A over native SLIM RPC |
//! | A2A handler + card | yes | A2A patterns (pub/sub + group chat) |
//! | A2A handler + card | no | A2A JSON-RPC over HTTP |
//! | MCP service | required | MCP memory-stream |
//! | MCP service (FastMCP) | optional | streamable HTTP (+ transport mirror) |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentfabric_server::{AppSession, SessionTarget};
//! # async fn run(card: agentfabric_core::AgentCard,
//! #              handler: Arc<dyn agentfabric_server::A2aHandler>,
//! #              transport: Arc<dyn agentfabric_transport::Transport>) -> agentfabric_core::Result<()> {
//! let session = AppSession::new();
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

pub mod bridge;
pub mod engine;
pub mod handlers;
pub mod mcp;
pub mod session;

pub use bridge::{Bridge, BridgeKind};
pub use engine::A2aEngine;
pub use handlers::{A2aHandler, EventSink, ToolHandler};
pub use mcp::{McpService, StreamRecord};
pub use session::{AppSession, SessionBuilder, SessionTarget};
