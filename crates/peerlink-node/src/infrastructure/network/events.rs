//! Node events and traffic counters shared by the engine threads.

use std::sync::atomic::{AtomicU64, Ordering};

use peerlink_core::protocol::messages::StatusReply;
use peerlink_core::{
    DisconnectReason, PeerEndpoint, SessionHandle, SessionId, SessionLifecycle, SessionState,
    TransitionError,
};
use tokio::sync::mpsc;
use tracing::warn;

/// Notifications emitted by a running node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    PeerFound(PeerEndpoint),
    Connected {
        session_id: SessionId,
        peer: PeerEndpoint,
    },
    /// Retryable; the node returns to discovery if reconnect is enabled.
    HandshakeFailed { attempts: u32 },
    /// Discovery hit its wall-clock bound without finding the peer.
    DiscoveryTimedOut { manual_fallback: bool },
    StatusReceived(StatusReply),
    Disconnected { reason: DisconnectReason },
}

/// Non-blocking event publisher.
///
/// Engines run on plain threads, so events go out with `try_send`.  A full
/// channel drops the event with a warning instead of stalling the engine.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<NodeEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<NodeEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: NodeEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!("event channel full; dropping {ev:?}");
            }
            // Receiver dropped: nobody is listening any more.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Applies a lifecycle transition and emits `StateChanged` if the state
    /// actually moved.
    pub fn transition<T>(
        &self,
        lifecycle: &SessionHandle,
        apply: impl FnOnce(&mut SessionLifecycle) -> Result<T, TransitionError>,
    ) -> Result<T, TransitionError> {
        let (from, result, to) = lifecycle.apply(|lc| {
            let from = lc.state();
            let result = apply(lc);
            Ok((from, result, lc.state()))
        })?;
        if from != to {
            self.emit(NodeEvent::StateChanged { from, to });
        }
        result
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Cumulative traffic counters for one node, updated lock-free by every
/// engine thread.
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub discovery_broadcasts: AtomicU64,
    pub frames_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub foreign_frames: AtomicU64,
    pub data_frames: AtomicU64,
    pub commands_handled: AtomicU64,
    pub status_received: AtomicU64,
    pub keepalives_sent: AtomicU64,
    pub keepalives_received: AtomicU64,
}

/// Point-in-time copy of [`LinkCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub discovery_broadcasts: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub foreign_frames: u64,
    pub data_frames: u64,
    pub commands_handled: u64,
    pub status_received: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
}

impl LinkCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStats {
            discovery_broadcasts: get(&self.discovery_broadcasts),
            frames_received: get(&self.frames_received),
            malformed_frames: get(&self.malformed_frames),
            foreign_frames: get(&self.foreign_frames),
            data_frames: get(&self.data_frames),
            commands_handled: get(&self.commands_handled),
            status_received: get(&self.status_received),
            keepalives_sent: get(&self.keepalives_sent),
            keepalives_received: get(&self.keepalives_received),
        }
    }
}
