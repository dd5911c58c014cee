//! Tracing subscriber setup with the optional OTLP export layer.

use tracing_subscriber::EnvFilter;

use crate::config::TracingConfig;

/// Installed tracing stack. Keep the value alive for the lifetime of the
/// application; dropping it flushes the OTLP exporter when one is active.
pub struct TracingSystem {
    config: TracingConfig,
    #[cfg(feature = "otlp")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl TracingSystem {
    /// Install the global subscriber per the config. Safe to call once per
    /// process; later calls fail inside `tracing-subscriber`.
    pub fn init(config: TracingConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled(config));
        }

        #[cfg(feature = "otlp")]
        if config.otlp_enabled {
            use opentelemetry_otlp::WithExportConfig as _;
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(format!("{}/v1/traces", config.otlp_endpoint))
                .build()?;
            let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .build();
            use opentelemetry::trace::TracerProvider as _;
            let tracer = provider.tracer(config.service_name.clone());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::registry()
                .with(EnvFilter::from_default_env())
                .with(tracing_subscriber::fmt::layer())
                .with(otel_layer)
                .try_init()?;
            return Ok(Self {
                config,
                provider: Some(provider),
            });
        }

        if config.json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(EnvFilter::from_default_env())
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("tracing init: {e}"))?;
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("tracing init: {e}"))?;
        }
        Ok(Self::disabled(config))
    }

    fn disabled(config: TracingConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "otlp")]
            provider: None,
        }
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    /// Flush and shut down the exporter, when one is active.
    pub fn shutdown(self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("otlp shutdown failed: {e}");
            }
        }
    }
}
