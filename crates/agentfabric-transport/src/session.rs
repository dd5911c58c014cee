//! Transport-level sessions: a duplex handle over bounded channels.
//!
//! A [`TransportSession`] represents one logical conversation with one or
//! more peers: a point-to-point stream opened by a client, or a moderated
//! group chat. The handle side is fabric-agnostic; the owning transport
//! wires the [`SessionPipes`] to its own frames.

use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agentfabric_core::{FabricError, Result, Topic};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Closed,
    Errored,
}

/// The transport-facing ends of a session's channels.
pub struct SessionPipes {
    /// Frames the session user sends; the transport forwards them.
    pub outbound: mpsc::Receiver<Bytes>,
    /// Transport delivers received frames here. Bounded: a slow consumer
    /// suspends the transport's delivery, not the whole connection.
    pub inbound: mpsc::Sender<Bytes>,
    /// Fires when the user closes the session.
    pub cancel: CancellationToken,
}

/// User-facing duplex session handle.
pub struct TransportSession {
    id: Uuid,
    peer: Topic,
    outbound: mpsc::Sender<Bytes>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    state: RwLock<SessionState>,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Build a session and its transport-side pipes with the given channel
    /// capacity.
    pub fn channel(id: Uuid, peer: Topic, capacity: usize) -> (Self, SessionPipes) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let session = Self {
            id,
            peer,
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            state: RwLock::new(SessionState::Pending),
            cancel: cancel.clone(),
        };
        let pipes = SessionPipes {
            outbound: out_rx,
            inbound: in_tx,
            cancel,
        };
        (session, pipes)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &Topic {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("session state lock poisoned")
    }

    /// Transport-implementor hook: the session is wired and usable.
    pub fn mark_active(&self) {
        let mut state = self.state.write().expect("session state lock poisoned");
        if *state == SessionState::Pending {
            *state = SessionState::Active;
        }
    }

    /// Transport-implementor hook: the session failed.
    pub fn mark_errored(&self) {
        *self.state.write().expect("session state lock poisoned") = SessionState::Errored;
    }

    /// Send a payload into the session. Suspends when the bounded channel
    /// is full; fails with `Cancelled` once the session is closed.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if matches!(self.state(), SessionState::Closed | SessionState::Errored) {
            return Err(FabricError::Cancelled);
        }
        self.outbound
            .send(payload)
            .await
            .map_err(|_| FabricError::Cancelled)
    }

    /// Receive the next payload; `None` once the session ended.
    pub async fn recv(&self) -> Option<Bytes> {
        self.inbound.lock().await.recv().await
    }

    /// Receive with a deadline. `Ok(None)` means the session ended.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(item) => Ok(item),
            Err(_) => Err(FabricError::timeout(format!(
                "receive on session {}",
                self.id
            ))),
        }
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.write().expect("session state lock poisoned");
        if !matches!(*state, SessionState::Errored) {
            *state = SessionState::Closed;
        }
        drop(state);
        self.cancel.cancel();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> Topic {
        Topic::new("org", "ns", "peer").unwrap()
    }

    #[tokio::test]
    async fn test_session_duplex() {
        let (session, mut pipes) = TransportSession::channel(Uuid::new_v4(), topic(), 4);
        session.mark_active();
        assert_eq!(session.state(), SessionState::Active);

        session.send(Bytes::from_static(b"out")).await.unwrap();
        assert_eq!(pipes.outbound.recv().await.unwrap(), "out");

        pipes.inbound.send(Bytes::from_static(b"in")).await.unwrap();
        assert_eq!(session.recv().await.unwrap(), "in");
    }

    #[tokio::test]
    async fn test_send_after_close_is_cancelled() {
        let (session, _pipes) = TransportSession::channel(Uuid::new_v4(), topic(), 4);
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        let err = session.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, FabricError::Cancelled));
    }

    #[tokio::test]
    async fn test_recv_ends_when_transport_side_drops() {
        let (session, pipes) = TransportSession::channel(Uuid::new_v4(), topic(), 4);
        drop(pipes);
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (session, _pipes) = TransportSession::channel(Uuid::new_v4(), topic(), 4);
        let err = session
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Timeout { .. }));
    }
}
