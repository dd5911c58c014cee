//! AppSession: supervised container for protocol bridges.
//!
//! Children are siblings, not a hierarchy: a child that fails after start
//! is logged and marked errored while the others keep running; restart
//! policy belongs to the caller. Start failures roll back everything
//! already started, and shutdown stops children in reverse registration
//! order with a per-child grace period.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use agentfabric_core::a2a::AgentCard;
use agentfabric_core::config::fast_mcp_port;
use agentfabric_core::{FabricError, Result, SlimRpcConnectionConfig, Topic};
use agentfabric_transport::Transport;

use crate::bridge::{
    A2aHttpBridge, A2aPatternsBridge, A2aSlimRpcBridge, Bridge, FastMcpHttpBridge, McpStreamBridge,
};
use crate::engine::A2aEngine;
use crate::handlers::A2aHandler;
use crate::mcp::McpService;

const DEFAULT_MAX_SESSIONS: usize = 32;
const DEFAULT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_HTTP_PORT: u16 = 8080;

/// What a child bridge serves.
pub enum SessionTarget {
    /// A2A agent on the native SLIM RPC path; the bridge owns its own
    /// connection, any supplied transport is ignored.
    SlimRpc {
        config: SlimRpcConnectionConfig,
        handler: Arc<dyn A2aHandler>,
        card: AgentCard,
    },
    /// A2A agent: patterns bridge when a transport is supplied, plain
    /// HTTP JSON-RPC otherwise.
    A2a {
        handler: Arc<dyn A2aHandler>,
        card: AgentCard,
    },
    /// Low-level MCP service over the memory-stream bridge; a transport
    /// is required.
    Mcp { service: Arc<McpService> },
    /// FastMCP service: streamable HTTP, plus a transport mirror when a
    /// transport is supplied.
    FastMcp { service: Arc<McpService> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Registered,
    Running,
    Errored,
    Stopped,
}

struct Child {
    session_id: String,
    bridge: Arc<dyn Bridge>,
    state: ChildState,
}

struct AppSessionInner {
    children: Mutex<Vec<Child>>,
    max_sessions: usize,
    grace: Duration,
}

/// Supervised container owning up to `max_sessions` bridges.
#[derive(Clone)]
pub struct AppSession {
    inner: Arc<AppSessionInner>,
}

impl Default for AppSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AppSession {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, DEFAULT_GRACE)
    }

    pub fn with_limits(max_sessions: usize, grace: Duration) -> Self {
        Self {
            inner: Arc::new(AppSessionInner {
                children: Mutex::new(Vec::new()),
                max_sessions,
                grace,
            }),
        }
    }

    /// Begin registering a target; finish with [`SessionBuilder::build`].
    pub fn add(&self, target: SessionTarget) -> SessionBuilder {
        SessionBuilder {
            session: self.clone(),
            target,
            transport: None,
            topic: None,
            session_id: None,
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }

    /// Register a pre-built bridge under a session id.
    pub async fn register_bridge(
        &self,
        session_id: impl Into<String>,
        bridge: Arc<dyn Bridge>,
    ) -> Result<()> {
        let session_id = session_id.into();
        let mut children = self.inner.children.lock().await;
        if children.len() >= self.inner.max_sessions {
            return Err(FabricError::protocol(format!(
                "session limit of {} reached",
                self.inner.max_sessions
            )));
        }
        if children.iter().any(|c| c.session_id == session_id) {
            return Err(FabricError::protocol(format!(
                "session id '{session_id}' already registered"
            )));
        }
        if let Some(topic) = bridge.topic() {
            let taken: HashSet<&Topic> =
                children.iter().filter_map(|c| c.bridge.topic()).collect();
            if taken.contains(topic) {
                return Err(FabricError::protocol(format!(
                    "topic {topic} is already owned by another bridge"
                )));
            }
        }
        children.push(Child {
            session_id,
            bridge,
            state: ChildState::Registered,
        });
        Ok(())
    }

    /// Start every child in registration order. If one fails to start,
    /// the already-started children are stopped in reverse order and the
    /// error is returned. With `keep_alive` the call then blocks until an
    /// interrupt and shuts everything down.
    pub async fn start_all_sessions(&self, keep_alive: bool) -> Result<()> {
        {
            let mut children = self.inner.children.lock().await;
            for index in 0..children.len() {
                let result = children[index].bridge.start().await;
                match result {
                    Ok(()) => {
                        children[index].state = ChildState::Running;
                        info!(
                            session = %children[index].session_id,
                            bridge = children[index].bridge.kind().name(),
                            "session started"
                        );
                    }
                    Err(e) => {
                        error!(
                            session = %children[index].session_id,
                            %e,
                            "session failed to start, rolling back"
                        );
                        for started in children[..index].iter_mut().rev() {
                            Self::stop_child(started, self.inner.grace).await;
                        }
                        return Err(e);
                    }
                }
            }
        }

        if keep_alive {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(%e, "failed to listen for interrupt");
            }
            info!("shutdown signal received");
            self.shutdown_all().await;
        }
        Ok(())
    }

    /// Stop all running children in reverse registration order.
    pub async fn shutdown_all(&self) {
        let mut children = self.inner.children.lock().await;
        for child in children.iter_mut().rev() {
            if child.state == ChildState::Running {
                Self::stop_child(child, self.inner.grace).await;
            }
        }
    }

    async fn stop_child(child: &mut Child, grace: Duration) {
        match tokio::time::timeout(grace, child.bridge.shutdown()).await {
            Ok(Ok(())) => {
                info!(session = %child.session_id, "session stopped");
                child.state = ChildState::Stopped;
            }
            Ok(Err(e)) => {
                warn!(session = %child.session_id, %e, "session shutdown failed");
                child.state = ChildState::Errored;
            }
            Err(_) => {
                warn!(session = %child.session_id, "session shutdown exceeded grace period");
                child.state = ChildState::Errored;
            }
        }
    }

    /// Current state of a child; failed bridges report `Errored`.
    pub async fn status(&self, session_id: &str) -> Option<ChildState> {
        let children = self.inner.children.lock().await;
        children.iter().find(|c| c.session_id == session_id).map(|c| {
            if c.state == ChildState::Running && c.bridge.is_failed() {
                ChildState::Errored
            } else {
                c.state
            }
        })
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let children = self.inner.children.lock().await;
        children.iter().map(|c| c.session_id.clone()).collect()
    }
}

/// Fluent registration of one target.
pub struct SessionBuilder {
    session: AppSession,
    target: SessionTarget,
    transport: Option<Arc<dyn Transport>>,
    topic: Option<Topic>,
    session_id: Option<String>,
    host: String,
    port: Option<u16>,
}

impl SessionBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the subscription topic (default: derived from the card or
    /// service name).
    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    /// Caller-chosen label, unique within the supervisor.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Select the bridge for the target and register it.
    pub async fn build(self) -> Result<()> {
        let session_id = self
            .session_id
            .ok_or_else(|| FabricError::protocol("session_id is required"))?;

        let bridge: Arc<dyn Bridge> = match self.target {
            SessionTarget::SlimRpc {
                config,
                handler,
                card,
            } => {
                let engine = Arc::new(A2aEngine::new(card, handler));
                Arc::new(A2aSlimRpcBridge::new(engine, config))
            }
            SessionTarget::A2a { handler, card } => match self.transport {
                Some(transport) => {
                    let topic = match self.topic {
                        Some(topic) => topic,
                        None => card.topic()?,
                    };
                    let engine = Arc::new(A2aEngine::new(card, handler));
                    Arc::new(A2aPatternsBridge::new(engine, transport, topic))
                }
                None => {
                    let engine = Arc::new(A2aEngine::new(card, handler));
                    Arc::new(A2aHttpBridge::new(
                        engine,
                        self.host,
                        self.port.unwrap_or(DEFAULT_HTTP_PORT),
                    ))
                }
            },
            SessionTarget::Mcp { service } => {
                let transport = self.transport.ok_or_else(|| {
                    FabricError::protocol("mcp memory-stream target requires a transport")
                })?;
                let topic = match self.topic {
                    Some(topic) => topic,
                    None => Topic::from_display_name("default", "default", service.name())?,
                };
                Arc::new(McpStreamBridge::new(service, transport, topic))
            }
            SessionTarget::FastMcp { service } => {
                let port = self.port.unwrap_or_else(fast_mcp_port);
                let mut bridge = FastMcpHttpBridge::with_address(
                    Arc::clone(&service),
                    self.host,
                    port,
                );
                if let Some(transport) = self.transport {
                    let topic = match self.topic {
                        Some(topic) => topic,
                        None => Topic::from_display_name("default", "default", service.name())?,
                    };
                    bridge = bridge.with_transport_mirror(transport, topic);
                }
                Arc::new(bridge)
            }
        };

        self.session.register_bridge(session_id, bridge).await
    }
}
