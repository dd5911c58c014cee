//! Connection and client configuration.
//!
//! Each transport variant has its own config struct with defaults matching
//! the local development endpoints; [`ClientConfig`] collects the variants
//! a client is willing to use and is the input to transport negotiation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::a2a::TransportTag;
use crate::error::{FabricError, Result};
use crate::topic::Topic;

/// Default SLIM node endpoint.
pub const DEFAULT_SLIM_ENDPOINT: &str = "http://localhost:46357";

/// Default NATS broker endpoint.
pub const DEFAULT_NATS_ENDPOINT: &str = "localhost:4222";

/// Default FastMCP HTTP port, overridable via `FAST_MCP_PORT`.
pub const DEFAULT_FAST_MCP_PORT: u16 = 8081;

/// Minimum shared-secret length accepted outside insecure mode.
pub const MIN_SHARED_SECRET_LEN: usize = 32;

/// Resolve the FastMCP HTTP port from the environment.
pub fn fast_mcp_port() -> u16 {
    std::env::var("FAST_MCP_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_FAST_MCP_PORT)
}

/// SLIM connection bundle for the patterns transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlimConnectionConfig {
    /// `http(s)://host:port` of the SLIM node.
    pub endpoint: String,
    /// Local identity presented during the wire handshake.
    pub identity: Topic,
    /// Shared secret authenticating the identity.
    pub shared_secret: String,
    /// Skip TLS verification (development nodes).
    pub tls_insecure: bool,
    /// Connect retry limit.
    pub max_retries: u32,
    /// Base delay of the connect backoff.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
}

impl SlimConnectionConfig {
    pub fn new(identity: Topic, shared_secret: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_SLIM_ENDPOINT.to_string(),
            identity,
            shared_secret: shared_secret.into(),
            tls_insecure: false,
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_tls_insecure(mut self, insecure: bool) -> Self {
        self.tls_insecure = insecure;
        self
    }

    /// Enforce the production secret-length floor. Insecure mode only
    /// warns, so local nodes keep working with short dev secrets.
    pub fn validate(&self) -> Result<()> {
        if self.shared_secret.len() < MIN_SHARED_SECRET_LEN {
            if self.tls_insecure {
                tracing::warn!(
                    identity = %self.identity,
                    "shared secret below {MIN_SHARED_SECRET_LEN} bytes; acceptable only for development"
                );
                return Ok(());
            }
            return Err(FabricError::connect(format!(
                "shared secret must be at least {MIN_SHARED_SECRET_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// SLIM native-RPC connection bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlimRpcConnectionConfig {
    pub identity: Topic,
    pub shared_secret: String,
    pub endpoint: String,
    pub tls_insecure: bool,
}

impl SlimRpcConnectionConfig {
    pub fn new(identity: Topic, shared_secret: impl Into<String>) -> Self {
        Self {
            identity,
            shared_secret: shared_secret.into(),
            endpoint: DEFAULT_SLIM_ENDPOINT.to_string(),
            tls_insecure: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_tls_insecure(mut self, insecure: bool) -> Self {
        self.tls_insecure = insecure;
        self
    }

    /// Connection config for the underlying SLIM session layer.
    pub fn connection(&self) -> SlimConnectionConfig {
        SlimConnectionConfig {
            endpoint: self.endpoint.clone(),
            identity: self.identity.clone(),
            shared_secret: self.shared_secret.clone(),
            tls_insecure: self.tls_insecure,
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// NATS connection bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NatsConnectionConfig {
    /// `host:port` of the broker.
    pub endpoint: String,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
}

impl Default for NatsConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_NATS_ENDPOINT.to_string(),
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl NatsConnectionConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Per-transport client configuration; populated slots define the set of
/// transports this client can negotiate.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub slim: Option<SlimConnectionConfig>,
    pub nats: Option<NatsConnectionConfig>,
    pub slim_rpc: Option<SlimRpcConnectionConfig>,
    pub http_url: Option<String>,
    /// Request/reply deadline applied by clients built from this config.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    pub fn with_slim(mut self, config: SlimConnectionConfig) -> Self {
        self.slim = Some(config);
        self
    }

    pub fn with_nats(mut self, config: NatsConnectionConfig) -> Self {
        self.nats = Some(config);
        self
    }

    pub fn with_slim_rpc(mut self, config: SlimRpcConnectionConfig) -> Self {
        self.slim_rpc = Some(config);
        self
    }

    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Transports this config can drive.
    pub fn supported_transports(&self) -> Vec<TransportTag> {
        let mut tags = Vec::new();
        if self.slim_rpc.is_some() {
            tags.push(TransportTag::SlimRpc);
        }
        if self.slim.is_some() {
            tags.push(TransportTag::SlimPatterns);
        }
        if self.nats.is_some() {
            tags.push(TransportTag::NatsPatterns);
        }
        if self.http_url.is_some() {
            tags.push(TransportTag::JsonRpc);
        }
        tags
    }
}

/// Serde codec storing durations as integer milliseconds.
mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
