//! Error taxonomy shared by every Agent Fabric layer.
//!
//! One enum covers the whole bridge stack so that transports, bridges, and
//! clients can propagate failures with `?` without conversion boilerplate.
//! The variants mirror the failure modes that matter operationally:
//! connection establishment, in-flight transport faults, payload decoding,
//! timeouts, cancellation, negotiation, unsupported operations, and user
//! handler failures.

use thiserror::Error;

use crate::protocol::jsonrpc::{error_codes, JsonRpcError};

/// Canonical result type for all fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

#[derive(Debug, Error)]
pub enum FabricError {
    /// Endpoint could not be reached, even after retries.
    #[error("connect error: {message}")]
    Connect { message: String },

    /// Connection-level fault on an established transport.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Inbound payload could not be decoded. Receive loops log and drop
    /// these; they never tear down a subscription.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// An operation carrying an explicit deadline expired.
    #[error("timeout waiting for {operation}")]
    Timeout { operation: String },

    /// The awaited operation was cancelled by close or shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// Card and client config share no transport.
    #[error("no compatible transport for agent '{agent}'")]
    NoCompatibleTransport { agent: String },

    /// The transport does not implement the requested operation.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// A user-supplied handler failed. Converted into a JSON-RPC error
    /// response on the server side.
    #[error("handler error: {message}")]
    Handler { message: String },

    /// JSON-RPC envelope or protocol-state violation.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl FabricError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// True for errors a receive loop should swallow rather than surface.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Handler { .. })
    }

    /// Map this error onto the JSON-RPC error object returned to callers.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::Handler { message } => {
                JsonRpcError::new(error_codes::HANDLER_ERROR, message.clone())
            }
            Self::Timeout { .. } => {
                JsonRpcError::new(error_codes::REQUEST_TIMEOUT, self.to_string())
            }
            Self::Unsupported { .. } => {
                JsonRpcError::new(error_codes::METHOD_NOT_FOUND, self.to_string())
            }
            Self::Decode { .. } => JsonRpcError::parse_error(Some(self.to_string())),
            _ => JsonRpcError::internal_error(Some(self.to_string())),
        }
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for FabricError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_maps_to_jsonrpc_error() {
        let err = FabricError::handler("boom");
        let rpc = err.to_jsonrpc_error();
        assert_eq!(rpc.code, error_codes::HANDLER_ERROR);
        assert_eq!(rpc.message, "boom");
    }

    #[test]
    fn test_decode_errors_are_recoverable() {
        assert!(FabricError::decode("bad json").is_recoverable());
        assert!(!FabricError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_serde_error_converts_to_decode() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let fabric: FabricError = err.into();
        assert!(matches!(fabric, FabricError::Decode { .. }));
    }
}
