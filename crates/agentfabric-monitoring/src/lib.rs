//! # Agent Fabric Monitoring
//!
//! Tracing initialization and the pluggable span-export hook.
//!
//! Structured logging runs through `tracing`; this crate owns the
//! subscriber setup so that applications embedding the fabric get
//! consistent output with one call. Span export to an OTLP collector is
//! feature-gated (`otlp`) and configured through `OTLP_HTTP_ENDPOINT`;
//! anything beyond the hook (metrics, health, dashboards) is the host
//! application's business.
//!
//! ```rust,no_run
//! use agentfabric_monitoring::{TracingConfig, TracingSystem};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _tracing = TracingSystem::init(TracingConfig::from_env())?;
//!     tracing::info!("fabric starting");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod tracing;

pub use config::TracingConfig;
pub use tracing::TracingSystem;
