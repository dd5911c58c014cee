//! Wire-level protocol: JSON-RPC envelopes and transport framing.

pub mod envelope;
pub mod jsonrpc;

/// JSON-RPC version string used in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A2A method names carried over the fabric.
pub mod a2a_methods {
    pub const MESSAGE_SEND: &str = "message/send";
    pub const MESSAGE_STREAM: &str = "message/stream";
    pub const GROUPCHAT_INIT: &str = "groupchat/init";
}

/// MCP method names the fabric engine understands.
pub mod mcp_methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
}
