//! Session lifecycle.
//!
//! One [`SessionLifecycle`] exists per logical peer connection and is the
//! single source of truth for where that connection stands.  Every change
//! goes through a named transition method; an illegal move returns a
//! [`TransitionError`] and leaves the state unchanged.
//!
//! ```text
//!  Idle ──► Discovering ──► Handshaking ──► Connected ──► Disconnecting ──► Disconnected
//!                │                │                                            │
//!                └────────────────┴──────────── abort ─────────────────────────►│
//!                                                                               │
//!                ◄──────────────────────── begin_discovery ─────────────────────┘
//! ```
//!
//! Transitions only move forward, except `Disconnected → Discovering` when
//! the node reconnects.
//!
//! [`SessionHandle`] shares one lifecycle between the engine threads.  The
//! lock is held only for the duration of a transition.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::endpoint::PeerEndpoint;
use crate::domain::handshake::HandshakeState;

// ── Identifiers and states ────────────────────────────────────────────────────

/// Random identifier assigned each time a session reaches `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a peer connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Discovering,
    Handshaking,
    Connected,
    Disconnecting,
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Discovering => "discovering",
            SessionState::Handshaking => "handshaking",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why a connection left the connected path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// This node is shutting down.
    LocalShutdown,
    /// The peer sent DISCONNECT.
    PeerDisconnected,
    /// The peer sent the SHUTDOWN command.
    PeerShutdown,
    /// No KEEPALIVE arrived within the liveness timeout.
    LivenessTimeout,
    HandshakeFailed { attempts: u32 },
    DiscoveryTimedOut,
    /// Discovery or handshake was cancelled before finishing.
    Cancelled,
    /// A socket operation failed in a way the session cannot recover from.
    Transport(String),
}

impl DisconnectReason {
    /// `true` for reasons after which reconnecting makes sense.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::LocalShutdown | DisconnectReason::Cancelled
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::LocalShutdown => f.write_str("local shutdown"),
            DisconnectReason::PeerDisconnected => f.write_str("peer disconnected"),
            DisconnectReason::PeerShutdown => f.write_str("peer requested shutdown"),
            DisconnectReason::LivenessTimeout => f.write_str("peer went silent"),
            DisconnectReason::HandshakeFailed { attempts } => {
                write!(f, "handshake failed after {attempts} attempts")
            }
            DisconnectReason::DiscoveryTimedOut => f.write_str("discovery timed out"),
            DisconnectReason::Cancelled => f.write_str("cancelled"),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Errors returned by illegal lifecycle transitions.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TransitionError {
    #[error("cannot move from {from} to {to}")]
    Invalid {
        from: SessionState,
        to: SessionState,
    },

    #[error("cannot connect without a resolved peer endpoint")]
    MissingPeer,

    #[error("cannot connect before the handshake has completed")]
    HandshakeIncomplete,
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    state: SessionState,
    peer: Option<PeerEndpoint>,
    session_id: Option<SessionId>,
    last_disconnect: Option<DisconnectReason>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            peer: None,
            session_id: None,
            last_disconnect: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Option<PeerEndpoint> {
        self.peer
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// The reason the connection last left the connected path.
    pub fn last_disconnect(&self) -> Option<&DisconnectReason> {
        self.last_disconnect.as_ref()
    }

    /// `Idle | Disconnected → Discovering`.  Forgets the previous peer.
    pub fn begin_discovery(&mut self) -> Result<(), TransitionError> {
        self.require(
            &[SessionState::Idle, SessionState::Disconnected],
            SessionState::Discovering,
        )?;
        self.peer = None;
        self.session_id = None;
        self.set_state(SessionState::Discovering);
        Ok(())
    }

    /// `Discovering → Handshaking` with the resolved peer.
    ///
    /// A second peer reported after the first is rejected, so the endpoint
    /// is never replaced mid-connection.
    pub fn peer_found(&mut self, endpoint: PeerEndpoint) -> Result<(), TransitionError> {
        self.require(&[SessionState::Discovering], SessionState::Handshaking)?;
        self.peer = Some(endpoint);
        self.set_state(SessionState::Handshaking);
        Ok(())
    }

    /// `Handshaking → Connected`.  Requires a peer and a complete handshake.
    pub fn handshake_succeeded(
        &mut self,
        handshake: &HandshakeState,
    ) -> Result<SessionId, TransitionError> {
        self.require(&[SessionState::Handshaking], SessionState::Connected)?;
        if self.peer.is_none() {
            return Err(TransitionError::MissingPeer);
        }
        if !handshake.is_complete() {
            return Err(TransitionError::HandshakeIncomplete);
        }
        let id = SessionId::new_random();
        self.session_id = Some(id);
        self.last_disconnect = None;
        self.set_state(SessionState::Connected);
        Ok(id)
    }

    /// `Discovering | Handshaking → Disconnected` without ever connecting.
    pub fn abort(&mut self, reason: DisconnectReason) -> Result<(), TransitionError> {
        self.require(
            &[SessionState::Discovering, SessionState::Handshaking],
            SessionState::Disconnected,
        )?;
        self.last_disconnect = Some(reason);
        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    /// `Connected → Disconnecting`.
    ///
    /// Only the first caller succeeds; a racing second shutdown path gets an
    /// error and must not repeat the teardown.
    pub fn begin_disconnect(&mut self, reason: DisconnectReason) -> Result<(), TransitionError> {
        self.require(&[SessionState::Connected], SessionState::Disconnecting)?;
        self.last_disconnect = Some(reason);
        self.set_state(SessionState::Disconnecting);
        Ok(())
    }

    /// `Disconnecting → Disconnected`.
    pub fn finish_disconnect(&mut self) -> Result<(), TransitionError> {
        self.require(&[SessionState::Disconnecting], SessionState::Disconnected)?;
        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    fn require(&self, allowed: &[SessionState], to: SessionState) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.state,
                to,
            })
        }
    }

    fn set_state(&mut self, to: SessionState) {
        debug!("session state {} -> {}", self.state, to);
        self.state = to;
    }
}

// ── Shared handle ─────────────────────────────────────────────────────────────

/// Cloneable, thread-safe handle to one [`SessionLifecycle`].
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionLifecycle>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> SessionState {
        self.lock().state()
    }

    /// A copy of the whole lifecycle at this instant.
    pub fn snapshot(&self) -> SessionLifecycle {
        self.lock().clone()
    }

    /// Runs one transition under the lock.
    pub fn apply<T>(
        &self,
        transition: impl FnOnce(&mut SessionLifecycle) -> Result<T, TransitionError>,
    ) -> Result<T, TransitionError> {
        transition(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, SessionLifecycle> {
        // A panic on another thread mid-transition cannot leave the plain
        // enum fields half-written, so the poisoned value is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> PeerEndpoint {
        PeerEndpoint::new("10.0.0.2".parse().unwrap(), 45101, Some(45001))
    }

    fn complete_handshake() -> HandshakeState {
        let mut hs = HandshakeState::new(10);
        hs.on_tick();
        hs.on_handshake();
        hs.on_ready();
        hs
    }

    fn connected() -> SessionLifecycle {
        let mut lc = SessionLifecycle::new();
        lc.begin_discovery().unwrap();
        lc.peer_found(endpoint()).unwrap();
        lc.handshake_succeeded(&complete_handshake()).unwrap();
        lc
    }

    #[test]
    fn test_happy_path_reaches_connected_with_session_id() {
        // Arrange / Act
        let lc = connected();

        // Assert
        assert_eq!(lc.state(), SessionState::Connected);
        assert_eq!(lc.peer(), Some(endpoint()));
        assert!(lc.session_id().is_some());
    }

    #[test]
    fn test_incomplete_handshake_cannot_connect() {
        // Arrange
        let mut lc = SessionLifecycle::new();
        lc.begin_discovery().unwrap();
        lc.peer_found(endpoint()).unwrap();
        let mut hs = HandshakeState::new(10);
        hs.on_handshake();

        // Act
        let result = lc.handshake_succeeded(&hs);

        // Assert
        assert_eq!(result, Err(TransitionError::HandshakeIncomplete));
        assert_eq!(lc.state(), SessionState::Handshaking);
    }

    #[test]
    fn test_second_peer_while_handshaking_is_rejected() {
        // Arrange
        let mut lc = SessionLifecycle::new();
        lc.begin_discovery().unwrap();
        lc.peer_found(endpoint()).unwrap();
        let other = PeerEndpoint::new("10.0.0.99".parse().unwrap(), 45101, None);

        // Act
        let result = lc.peer_found(other);

        // Assert
        assert!(matches!(result, Err(TransitionError::Invalid { .. })));
        assert_eq!(lc.peer(), Some(endpoint()));
    }

    #[test]
    fn test_connected_cannot_move_backwards() {
        let mut lc = connected();
        assert!(lc.begin_discovery().is_err());
        assert!(lc.peer_found(endpoint()).is_err());
        assert!(lc.abort(DisconnectReason::Cancelled).is_err());
        assert_eq!(lc.state(), SessionState::Connected);
    }

    #[test]
    fn test_only_first_disconnect_wins() {
        // Arrange
        let mut lc = connected();

        // Act
        let first = lc.begin_disconnect(DisconnectReason::PeerShutdown);
        let second = lc.begin_disconnect(DisconnectReason::LivenessTimeout);

        // Assert
        assert!(first.is_ok());
        assert!(second.is_err());
        assert_eq!(lc.last_disconnect(), Some(&DisconnectReason::PeerShutdown));
    }

    #[test]
    fn test_disconnected_can_rediscover() {
        // Arrange
        let mut lc = connected();
        lc.begin_disconnect(DisconnectReason::LivenessTimeout).unwrap();
        lc.finish_disconnect().unwrap();

        // Act
        lc.begin_discovery().unwrap();

        // Assert
        assert_eq!(lc.state(), SessionState::Discovering);
        assert_eq!(lc.peer(), None);
        assert_eq!(lc.last_disconnect(), Some(&DisconnectReason::LivenessTimeout));
    }

    #[test]
    fn test_abort_from_handshaking_records_reason() {
        let mut lc = SessionLifecycle::new();
        lc.begin_discovery().unwrap();
        lc.peer_found(endpoint()).unwrap();
        lc.abort(DisconnectReason::HandshakeFailed { attempts: 10 }).unwrap();
        assert_eq!(lc.state(), SessionState::Disconnected);
        assert_eq!(
            lc.last_disconnect(),
            Some(&DisconnectReason::HandshakeFailed { attempts: 10 })
        );
    }

    #[test]
    fn test_finish_disconnect_requires_disconnecting() {
        let mut lc = connected();
        assert_eq!(
            lc.finish_disconnect(),
            Err(TransitionError::Invalid {
                from: SessionState::Connected,
                to: SessionState::Disconnected,
            })
        );
    }

    #[test]
    fn test_handle_shares_state_across_clones() {
        // Arrange
        let handle = SessionHandle::new();
        let clone = handle.clone();

        // Act
        clone.apply(|lc| lc.begin_discovery()).unwrap();

        // Assert
        assert_eq!(handle.current_state(), SessionState::Discovering);
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(DisconnectReason::LivenessTimeout.is_retryable());
        assert!(DisconnectReason::HandshakeFailed { attempts: 3 }.is_retryable());
        assert!(!DisconnectReason::LocalShutdown.is_retryable());
    }
}
