//! A2A over plain HTTP JSON-RPC.
//!
//! Fallback bridge for targets registered without a transport: an axum
//! server accepting JSON-RPC POSTs at `/` and serving the agent card at
//! the well-known path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use agentfabric_core::{FabricError, JsonRpcRequest, Result, Topic};

use crate::bridge::{Bridge, BridgeKind};
use crate::engine::A2aEngine;

/// HTTP JSON-RPC bridge.
pub struct A2aHttpBridge {
    engine: Arc<A2aEngine>,
    host: String,
    port: u16,
    cancel: CancellationToken,
    bound: Mutex<Option<SocketAddr>>,
    failed: Arc<AtomicBool>,
}

impl A2aHttpBridge {
    pub fn new(engine: Arc<A2aEngine>, host: impl Into<String>, port: u16) -> Self {
        Self {
            engine,
            host: host.into(),
            port,
            cancel: CancellationToken::new(),
            bound: Mutex::new(None),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Address the server actually bound, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().expect("bound lock poisoned")
    }
}

#[async_trait]
impl Bridge for A2aHttpBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::A2aHttp
    }

    fn topic(&self) -> Option<&Topic> {
        None
    }

    async fn start(&self) -> Result<()> {
        let app = Router::new()
            .route("/", post(handle_jsonrpc))
            .route("/.well-known/agent-card.json", get(handle_card))
            .with_state(Arc::clone(&self.engine));

        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                FabricError::connect(format!("bind {}:{}: {e}", self.host, self.port))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| FabricError::connect(e.to_string()))?;
        *self.bound.lock().expect("bound lock poisoned") = Some(addr);
        info!(%addr, agent = %self.engine.card().name, "a2a http bridge listening");

        let cancel = self.cancel.clone();
        let failed = Arc::clone(&self.failed);
        tokio::spawn(async move {
            let shutdown = cancel.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(%e, "a2a http server failed");
                failed.store(true, Ordering::Relaxed);
            }
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

async fn handle_jsonrpc(
    State(engine): State<Arc<A2aEngine>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    Json(engine.handle_request(request).await)
}

async fn handle_card(State(engine): State<Arc<A2aEngine>>) -> impl IntoResponse {
    Json(engine.card().clone())
}
