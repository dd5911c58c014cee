//! Common imports for fabric applications.
//!
//! ```rust
//! use agentfabric::prelude::*;
//! ```

pub use crate::AgentFabric;

pub use agentfabric_core::a2a::{
    AgentCapabilities, AgentCard, AgentSkill, Message, Part, Role, TransportTag,
};
pub use agentfabric_core::mcp::{Tool, ToolCallRequest, ToolCallResponse, ToolContent};
pub use agentfabric_core::{
    ClientConfig, FabricError, NatsConnectionConfig, Result, SlimConnectionConfig,
    SlimRpcConnectionConfig, Topic,
};

pub use agentfabric_transport::{
    NatsTransport, SlimRpcChannel, SlimTransport, Transport, TransportConfig, TransportSession,
};

pub use agentfabric_server::{
    A2aHandler, AppSession, EventSink, McpService, SessionTarget, ToolHandler,
};

pub use agentfabric_client::{
    A2aClient, A2aClientFactory, A2aClientKind, A2aExperimentalClient, FastMcpHttpClient,
    GroupChat, McpClient, McpClientFactory,
};

pub use agentfabric_monitoring::{TracingConfig, TracingSystem};
