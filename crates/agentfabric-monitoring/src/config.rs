//! Tracing configuration.

use serde::{Deserialize, Serialize};

/// Default OTLP collector endpoint, overridable via `OTLP_HTTP_ENDPOINT`.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Configuration for the tracing system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Skip subscriber installation entirely.
    pub enabled: bool,
    /// Service name attached to exported spans.
    pub service_name: String,
    /// Emit JSON lines instead of the human console format.
    pub json: bool,
    /// Export spans to an OTLP collector (requires the `otlp` feature).
    pub otlp_enabled: bool,
    /// Collector endpoint.
    pub otlp_endpoint: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "agentfabric".to_string(),
            json: false,
            otlp_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
        }
    }
}

impl TracingConfig {
    /// Defaults with the OTLP endpoint taken from the environment.
    pub fn from_env() -> Self {
        let otlp_endpoint = std::env::var("OTLP_HTTP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());
        Self {
            otlp_endpoint,
            ..Self::default()
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_otlp(mut self, enabled: bool) -> Self {
        self.otlp_enabled = enabled;
        self
    }
}
