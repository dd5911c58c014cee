//! Protocol bridges: one application protocol over one transport.
//!
//! Each bridge owns at most one subscription and one protocol engine
//! instance. Bridges are started and stopped by the [`AppSession`]
//! supervisor and never restart themselves.
//!
//! [`AppSession`]: crate::session::AppSession

pub mod a2a_http;
pub mod a2a_patterns;
pub mod a2a_rpc;
pub mod fastmcp_http;
pub mod mcp_stream;

use async_trait::async_trait;

use agentfabric_core::{Result, Topic};

pub use a2a_http::A2aHttpBridge;
pub use a2a_patterns::A2aPatternsBridge;
pub use a2a_rpc::A2aSlimRpcBridge;
pub use fastmcp_http::FastMcpHttpBridge;
pub use mcp_stream::McpStreamBridge;

/// Bridge variants the supervisor can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    A2aSlimRpc,
    A2aPatterns,
    A2aHttp,
    McpStream,
    FastMcpHttp,
}

impl BridgeKind {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeKind::A2aSlimRpc => "a2a-slimrpc",
            BridgeKind::A2aPatterns => "a2a-patterns",
            BridgeKind::A2aHttp => "a2a-http",
            BridgeKind::McpStream => "mcp-stream",
            BridgeKind::FastMcpHttp => "fastmcp-http",
        }
    }
}

/// A running protocol/transport adapter.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn kind(&self) -> BridgeKind;

    /// Subscription topic, for bridges that own one.
    fn topic(&self) -> Option<&Topic>;

    /// Bring the bridge up: subscribe, bind, spawn pumps. Fatal errors
    /// here roll back the supervisor's start sequence.
    async fn start(&self) -> Result<()>;

    /// Tear the bridge down and let in-flight work drain.
    async fn shutdown(&self) -> Result<()>;

    /// True once an internal task hit a fatal error after start.
    fn is_failed(&self) -> bool {
        false
    }
}
