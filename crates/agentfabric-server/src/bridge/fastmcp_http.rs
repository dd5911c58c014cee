//! FastMCP streamable-HTTP bridge.
//!
//! Always runs an HTTP server implementing the streamable handshake: the
//! first POST (`initialize`) is answered with an `Mcp-Session-Id` header,
//! the client confirms with `notifications/initialized` echoing it, and
//! every later POST must carry the header to reach tools/list and
//! tools/call. When a transport is attached, the same service is mirrored
//! over it with the memory-stream bridge.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use agentfabric_core::config::fast_mcp_port;
use agentfabric_core::protocol::mcp_methods;
use agentfabric_core::{
    FabricError, JsonRpcError, JsonRpcMessage, JsonRpcResponse, Result, Topic,
};
use agentfabric_transport::Transport;

use crate::bridge::{Bridge, BridgeKind, McpStreamBridge};
use crate::mcp::McpService;

/// Header carrying the negotiated session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable-HTTP MCP bridge with an optional transport mirror.
pub struct FastMcpHttpBridge {
    service: Arc<McpService>,
    host: String,
    port: u16,
    mirror: Option<Arc<McpStreamBridge>>,
    cancel: CancellationToken,
    bound: Mutex<Option<SocketAddr>>,
    failed: Arc<AtomicBool>,
}

#[derive(Default)]
struct HttpSession {
    initialized: bool,
}

#[derive(Clone)]
struct HttpState {
    service: Arc<McpService>,
    sessions: Arc<RwLock<HashMap<String, HttpSession>>>,
}

impl FastMcpHttpBridge {
    /// Bridge on the default port (`FAST_MCP_PORT` or 8081).
    pub fn new(service: Arc<McpService>) -> Self {
        Self::with_address(service, "127.0.0.1", fast_mcp_port())
    }

    pub fn with_address(service: Arc<McpService>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service,
            host: host.into(),
            port,
            mirror: None,
            cancel: CancellationToken::new(),
            bound: Mutex::new(None),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mirror the same service over a transport topic as well.
    pub fn with_transport_mirror(mut self, transport: Arc<dyn Transport>, topic: Topic) -> Self {
        self.mirror = Some(Arc::new(McpStreamBridge::new(
            Arc::clone(&self.service),
            transport,
            topic,
        )));
        self
    }

    /// Address the server actually bound, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().expect("bound lock poisoned")
    }
}

#[async_trait]
impl Bridge for FastMcpHttpBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::FastMcpHttp
    }

    fn topic(&self) -> Option<&Topic> {
        self.mirror.as_ref().and_then(|m| m.topic())
    }

    async fn start(&self) -> Result<()> {
        let state = HttpState {
            service: Arc::clone(&self.service),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        };
        let app = Router::new()
            .route("/", post(handle_post))
            .layer(CorsLayer::permissive())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                FabricError::connect(format!("bind {}:{}: {e}", self.host, self.port))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| FabricError::connect(e.to_string()))?;
        *self.bound.lock().expect("bound lock poisoned") = Some(addr);
        info!(%addr, server = %self.service.name(), "fastmcp http bridge listening");

        let cancel = self.cancel.clone();
        let failed = Arc::clone(&self.failed);
        tokio::spawn(async move {
            let shutdown = cancel.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(%e, "fastmcp http server failed");
                failed.store(true, Ordering::Relaxed);
            }
        });

        if let Some(mirror) = &self.mirror {
            mirror.start().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(mirror) = &self.mirror {
            mirror.shutdown().await?;
        }
        Ok(())
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn rejection(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(JsonRpcResponse::error(
            JsonRpcError::invalid_request(Some(message.to_string())),
            None,
        )),
    )
        .into_response()
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(JsonRpcError::parse_error(None), None)),
            )
                .into_response();
        }
    };

    let method = match &message {
        JsonRpcMessage::Request(request) => request.method.clone(),
        JsonRpcMessage::Response(_) => {
            return rejection(StatusCode::BAD_REQUEST, "unexpected response body");
        }
    };

    // Handshake step 1: initialize mints the session id.
    if method == mcp_methods::INITIALIZE {
        let session_id = extract_session_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let mut sessions = state.sessions.write().expect("sessions lock poisoned");
            sessions.entry(session_id.clone()).or_default();
        }
        let reply = state.service.handle_message(message).await;
        return match reply {
            Some(JsonRpcMessage::Response(response)) => {
                (StatusCode::OK, [(SESSION_HEADER, session_id)], Json(response)).into_response()
            }
            _ => rejection(StatusCode::INTERNAL_SERVER_ERROR, "initialize produced no response"),
        };
    }

    // Every other message must present a known session id.
    let session_id = match extract_session_id(&headers) {
        Some(id) => id,
        None => return rejection(StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header"),
    };
    let known = {
        let sessions = state.sessions.read().expect("sessions lock poisoned");
        sessions.contains_key(&session_id)
    };
    if !known {
        return rejection(StatusCode::NOT_FOUND, "unknown session");
    }

    // Handshake step 2: the initialized notification confirms the session.
    if method == mcp_methods::INITIALIZED {
        {
            let mut sessions = state.sessions.write().expect("sessions lock poisoned");
            if let Some(session) = sessions.get_mut(&session_id) {
                session.initialized = true;
            }
        }
        let _ = state.service.handle_message(message).await;
        return (StatusCode::OK, [(SESSION_HEADER, session_id)]).into_response();
    }

    let confirmed = {
        let sessions = state.sessions.read().expect("sessions lock poisoned");
        sessions
            .get(&session_id)
            .map(|s| s.initialized)
            .unwrap_or(false)
    };
    if !confirmed {
        return rejection(StatusCode::BAD_REQUEST, "session not initialized");
    }

    match state.service.handle_message(message).await {
        Some(JsonRpcMessage::Response(response)) => {
            (StatusCode::OK, [(SESSION_HEADER, session_id)], Json(response)).into_response()
        }
        _ => (StatusCode::ACCEPTED, [(SESSION_HEADER, session_id)]).into_response(),
    }
}
