//! # Agent Fabric Core
//!
//! Protocol types, framing, and configuration for Agent Fabric.
//!
//! This crate carries everything the transport and bridge layers agree on
//! without depending on each other:
//!
//! - **Errors**: the [`FabricError`](error::FabricError) taxonomy shared by
//!   every layer, with its JSON-RPC error mapping.
//! - **Topics**: the three-segment `org/namespace/name` identity used both
//!   as a routing subject and as an authenticated principal.
//! - **Protocol**: JSON-RPC 2.0 envelopes, the pattern envelope that adds
//!   routing metadata for pub/sub transports, and the MCP multiplexing
//!   frame.
//! - **A2A types**: agent cards, messages, parts, and the transport tags a
//!   card may advertise.
//! - **MCP types**: tools, tool calls, and the initialize lifecycle.
//! - **Configuration**: per-transport connection configs and the client
//!   config used for transport negotiation.
//!
//! Everything here is plain data: no I/O, no async, no runtime dependency.

pub mod a2a;
pub mod config;
pub mod error;
pub mod mcp;
pub mod protocol;
pub mod topic;

pub use error::{FabricError, Result};
pub use topic::Topic;

pub use a2a::{AgentCapabilities, AgentCard, AgentSkill, Message, Part, Role, TransportTag};
pub use config::{
    ClientConfig, NatsConnectionConfig, SlimConnectionConfig, SlimRpcConnectionConfig,
};
pub use mcp::{Tool, ToolCallRequest, ToolCallResponse, ToolContent};
pub use protocol::envelope::{McpFrame, PatternEnvelope};
pub use protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId,
};
