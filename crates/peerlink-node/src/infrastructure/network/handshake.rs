//! The `HANDSHAKE`/`READY` exchange on the data socket.
//!
//! Runs after discovery and before the session.  Two clocks drive it:
//!
//! - every *poll interval* the data socket is drained, answering each
//!   `HANDSHAKE` from the peer with `READY` and recording each `READY`;
//! - every *handshake interval* the [`HandshakeState`] ticks, which either
//!   sends one more `HANDSHAKE` or gives up after the last attempt.
//!
//! Meanwhile the discovery sockets keep answering the peer's `DISCOVER`
//! broadcasts, in case our acknowledgement never reached it.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use peerlink_core::protocol::messages::MAX_DATAGRAM_SIZE;
use peerlink_core::{
    decode_message, encode_message, DiscoveryTracker, HandshakeAction, HandshakeState,
    LinkSettings, PeerEndpoint, PeerMessage, ProtocolError,
};
use tracing::{debug, info, warn};

use super::binder::{recv_nonblocking, DiscoverySockets};
use super::discovery::answer_pending_announcements;
use super::events::LinkCounters;

/// How a handshake run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Complete(HandshakeState),
    Failed { attempts: u32 },
    Cancelled,
}

/// Sockets and counters the handshake works with.
pub struct HandshakeIo<'a> {
    pub data_socket: &'a UdpSocket,
    /// `None` when discovery is disabled.
    pub discovery: Option<&'a DiscoverySockets>,
    pub counters: &'a LinkCounters,
}

/// Runs the handshake with `peer` until it completes, fails or is cancelled.
///
/// # Errors
///
/// Returns [`ProtocolError`] only if this node's own frames cannot be
/// encoded.
pub fn run_handshake(
    settings: &LinkSettings,
    io: &HandshakeIo<'_>,
    peer: &PeerEndpoint,
    tracker: &mut DiscoveryTracker,
    running: &AtomicBool,
) -> Result<HandshakeOutcome, ProtocolError> {
    let handshake = encode_message(&PeerMessage::Handshake {
        sender_id: settings.local_id.clone(),
    })?;
    let ready = encode_message(&PeerMessage::Ready {
        sender_id: settings.local_id.clone(),
    })?;
    let ack = encode_message(&tracker.acknowledgement(settings.data_port))?;

    let dest = peer.data_addr();
    let mut state = HandshakeState::new(settings.handshake_attempts);
    let mut next_tick = Instant::now();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    info!("handshaking with {} at {dest}", settings.peer_id);

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= next_tick {
            match state.on_tick() {
                HandshakeAction::SendHandshake { attempt } => {
                    debug!("HANDSHAKE attempt {attempt}/{}", state.max_attempts());
                    if let Err(e) = io.data_socket.send_to(&handshake, dest) {
                        warn!("failed to send HANDSHAKE to {dest}: {e}");
                    }
                }
                HandshakeAction::Complete => return Ok(HandshakeOutcome::Complete(state)),
                HandshakeAction::Failed { attempts } => {
                    warn!("handshake with {} failed after {attempts} attempts", settings.peer_id);
                    return Ok(HandshakeOutcome::Failed { attempts });
                }
            }
            next_tick = now + settings.handshake_interval;
        }

        drain_data_socket(settings, io, peer, &mut state, &ready, &mut buf);
        if state.is_complete() {
            info!("handshake with {} complete", settings.peer_id);
            return Ok(HandshakeOutcome::Complete(state));
        }

        if let Some(discovery) = io.discovery {
            answer_pending_announcements(discovery, tracker, &ack, io.counters, &mut buf);
        }

        std::thread::sleep(settings.poll_interval);
    }

    debug!("handshake cancelled");
    Ok(HandshakeOutcome::Cancelled)
}

fn drain_data_socket(
    settings: &LinkSettings,
    io: &HandshakeIo<'_>,
    peer: &PeerEndpoint,
    state: &mut HandshakeState,
    ready: &[u8],
    buf: &mut [u8],
) {
    loop {
        let (len, src) = match recv_nonblocking(io.data_socket, buf) {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                warn!("handshake recv error: {e}");
                return;
            }
        };

        if src.ip() != peer.address {
            LinkCounters::bump(&io.counters.foreign_frames);
            debug!("ignoring datagram from {src} during handshake");
            continue;
        }

        match decode_message(&buf[..len]) {
            Ok(PeerMessage::Handshake { sender_id }) if sender_id == settings.peer_id => {
                state.on_handshake();
                if let Err(e) = io.data_socket.send_to(ready, peer.data_addr()) {
                    warn!("failed to send READY: {e}");
                }
            }
            Ok(PeerMessage::Ready { sender_id }) if sender_id == settings.peer_id => {
                state.on_ready();
            }
            Ok(other) => {
                debug!("ignoring {} during handshake", other.message_type());
            }
            Err(e) => {
                LinkCounters::bump(&io.counters.malformed_frames);
                debug!("failed to decode handshake datagram from {src}: {e}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
