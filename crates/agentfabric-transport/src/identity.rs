//! Pluggable identity verification.
//!
//! The fabric treats identity as an external concern behind a narrow
//! trait. The built-in [`SharedSecretVerifier`] covers the SLIM wire
//! handshake; deployments with a real identity service plug their own
//! verifier in and enable it through the environment.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use agentfabric_core::{Result, Topic};

/// Credential check applied to a connecting identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, identity: &Topic, credential: &str) -> Result<bool>;
}

/// Digest presented by a client for `identity` under `shared_secret`.
pub fn auth_digest(identity: &Topic, shared_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(shared_secret.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Shared-secret verifier: accepts any identity presenting the digest of
/// itself under the configured secret.
pub struct SharedSecretVerifier {
    shared_secret: String,
}

impl SharedSecretVerifier {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for SharedSecretVerifier {
    async fn verify(&self, identity: &Topic, credential: &str) -> Result<bool> {
        Ok(credential == auth_digest(identity, &self.shared_secret))
    }
}

/// Verifier that accepts everything; used when identity auth is disabled.
pub struct NoopVerifier;

#[async_trait]
impl IdentityVerifier for NoopVerifier {
    async fn verify(&self, _identity: &Topic, _credential: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Environment-driven identity settings.
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
}

impl IdentityConfig {
    /// Read `IDENTITY_AUTH_ENABLED` and `IDENTITY_SERVICE_API_KEY`.
    pub fn from_env() -> Self {
        let enabled = std::env::var("IDENTITY_AUTH_ENABLED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            enabled,
            api_key: std::env::var("IDENTITY_SERVICE_API_KEY").ok(),
        }
    }
}
