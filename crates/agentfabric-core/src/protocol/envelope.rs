//! Transport framing for protocol payloads.
//!
//! Two frame shapes travel over the fabric:
//!
//! - [`PatternEnvelope`] wraps an A2A JSON-RPC message with routing
//!   metadata (`from`, `to`, optional broadcast group) for the
//!   `slimpatterns`/`natspatterns` variants. The native SLIM-RPC path
//!   carries bare JSON-RPC and never sees this envelope.
//! - [`McpFrame`] wraps opaque MCP JSON-RPC bytes with a stream id and a
//!   sequence number so that several client streams can be multiplexed
//!   over one subscription.
//!
//! Decoding failures surface as [`FabricError::Decode`]; receive loops log
//! and drop them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::protocol::jsonrpc::JsonRpcMessage;
use crate::topic::Topic;

/// Routing envelope for A2A traffic over pub/sub transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternEnvelope {
    pub from: Topic,
    pub to: Topic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_group: Option<Topic>,
    pub payload: JsonRpcMessage,
}

impl PatternEnvelope {
    pub fn new(from: Topic, to: Topic, payload: JsonRpcMessage) -> Self {
        Self {
            from,
            to,
            broadcast_group: None,
            payload,
        }
    }

    pub fn with_broadcast_group(mut self, group: Topic) -> Self {
        self.broadcast_group = Some(group);
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self)?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| FabricError::decode(format!("pattern envelope: {e}")))
    }
}

/// Multiplexing frame for MCP byte streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpFrame {
    pub stream_id: String,
    pub seq: u64,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
}

impl McpFrame {
    pub fn new(stream_id: impl Into<String>, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            stream_id: stream_id.into(),
            seq,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self)?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| FabricError::decode(format!("mcp frame: {e}")))
    }

    /// Parse the carried bytes as a JSON-RPC message.
    pub fn message(&self) -> Result<JsonRpcMessage> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| FabricError::decode(format!("mcp frame payload: {e}")))
    }
}

/// Base64 codec for payload bytes inside JSON frames.
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
