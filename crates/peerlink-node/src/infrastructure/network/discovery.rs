//! UDP broadcast-based peer discovery.
//!
//! The engine broadcasts `DISCOVER:<id>:<data_port>[:<discovery_port>]` to
//! every port in the discovery window on a fixed interval and polls its
//! sockets between broadcasts.  On receiving a `DISCOVER` or `ACKNOWLEDGE`
//! from the expected peer it:
//!
//! 1. Records the peer's address and ports.
//! 2. Replies `ACKNOWLEDGE` if the datagram was a `DISCOVER`, so the peer
//!    learns about us even if our own broadcast was lost.
//! 3. Returns [`DiscoveryOutcome::Found`].
//!
//! What each datagram means is decided by [`DiscoveryTracker`]; this module
//! only moves bytes.
//!
//! # How UDP discovery works (for beginners)
//!
//! A datagram sent to the broadcast address (`255.255.255.255`) is delivered
//! to every host on the LAN segment.  Whichever host has a socket bound on
//! the destination port receives it.  Broadcasts are unreliable, which is
//! why the announcement is repeated every couple of seconds until the peer
//! answers.
//!
//! # Non-blocking polling
//!
//! All sockets are non-blocking.  Each loop iteration drains every waiting
//! datagram and then sleeps for the poll interval, so the loop notices a
//! cleared `running` flag (or an elapsed timeout) within one interval.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use peerlink_core::protocol::messages::MAX_DATAGRAM_SIZE;
use peerlink_core::{
    decode_message, encode_message, DiscoveryTracker, DiscoveryVerdict, IgnoreReason,
    LinkSettings, PeerEndpoint, ProtocolError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::binder::{recv_nonblocking, DiscoverySockets};
use super::events::LinkCounters;

/// Error type for the discovery engine.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The announcement could not be encoded.
    #[error("failed to encode announcement: {0}")]
    Encode(#[from] ProtocolError),
}

/// How a discovery run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(PeerEndpoint),
    /// The configured wall-clock bound elapsed first.
    TimedOut,
    /// The `running` flag was cleared.
    Cancelled,
}

/// Broadcasts and listens until the peer is found, the timeout elapses, or
/// `running` is cleared.
///
/// `tracker` must already be started; it is left in the `Found` phase on
/// success so the handshake can keep answering the peer's announcements.
///
/// # Errors
///
/// Returns [`DiscoveryError::Encode`] if this node's own announcement cannot
/// be encoded.
pub fn run_discovery(
    settings: &LinkSettings,
    sockets: &DiscoverySockets,
    tracker: &mut DiscoveryTracker,
    counters: &LinkCounters,
    running: &AtomicBool,
) -> Result<DiscoveryOutcome, DiscoveryError> {
    let announcement =
        encode_message(&tracker.announcement(settings.data_port, sockets.receiver_port))?;
    let ack = encode_message(&tracker.acknowledgement(settings.data_port))?;
    let targets = settings.broadcast_targets();

    let started = Instant::now();
    let mut next_broadcast = started;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    info!(
        "Broadcasting presence as {} on ports {}..={}; waiting for {}",
        tracker.local(),
        settings.discovery_base_port,
        targets.last().map(SocketAddr::port).unwrap_or(settings.discovery_base_port),
        tracker.expected()
    );

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if settings
            .discovery_timeout
            .is_some_and(|limit| now.duration_since(started) >= limit)
        {
            info!("discovery timed out after {:?}", now.duration_since(started));
            return Ok(DiscoveryOutcome::TimedOut);
        }

        if now >= next_broadcast {
            broadcast(&sockets.sender, &announcement, &targets);
            LinkCounters::bump(&counters.discovery_broadcasts);
            next_broadcast = now + settings.discovery_interval;
        }

        for socket in sockets.inbound() {
            let found = poll_socket(socket, &sockets.sender, tracker, &ack, counters, &mut buf);
            if let Some(endpoint) = found {
                info!("peer {} found at {endpoint}", tracker.expected());
                return Ok(DiscoveryOutcome::Found(endpoint));
            }
        }

        std::thread::sleep(settings.poll_interval);
    }

    debug!("discovery cancelled");
    Ok(DiscoveryOutcome::Cancelled)
}

/// Answers `DISCOVER` from the expected peer on every inbound discovery
/// socket without changing any state.  Used while the handshake runs, so a
/// peer whose first acknowledgement was lost still finds us.
pub fn answer_pending_announcements(
    sockets: &DiscoverySockets,
    tracker: &mut DiscoveryTracker,
    ack: &[u8],
    counters: &LinkCounters,
    buf: &mut [u8],
) {
    for socket in sockets.inbound() {
        poll_socket(socket, &sockets.sender, tracker, ack, counters, buf);
    }
}

/// Drains `socket`.  Returns the endpoint if one datagram found the peer.
fn poll_socket(
    socket: &UdpSocket,
    sender: &UdpSocket,
    tracker: &mut DiscoveryTracker,
    ack: &[u8],
    counters: &LinkCounters,
    buf: &mut [u8],
) -> Option<PeerEndpoint> {
    loop {
        let (len, src) = match recv_nonblocking(socket, buf) {
            Ok(Some(pair)) => pair,
            Ok(None) => return None,
            Err(e) => {
                warn!("discovery recv error: {e}");
                return None;
            }
        };

        let msg = match decode_message(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                LinkCounters::bump(&counters.malformed_frames);
                debug!("failed to decode discovery datagram from {src}: {e}");
                continue;
            }
        };

        let verdict = tracker.observe(&msg, src);
        if let Some(dest) = verdict.reply_ack_to() {
            match sender.send_to(ack, dest) {
                Ok(_) => debug!("acknowledged {} at {dest}", tracker.expected()),
                Err(e) => warn!("failed to send ACKNOWLEDGE to {dest}: {e}"),
            }
        }

        match verdict {
            DiscoveryVerdict::Found { endpoint, .. } => return Some(endpoint),
            DiscoveryVerdict::AlreadyFound { .. } => {}
            DiscoveryVerdict::Ignored(IgnoreReason::UnexpectedSender) => {
                debug!("ignoring {} from unexpected sender at {src}", msg.message_type());
            }
            DiscoveryVerdict::Ignored(_) => {}
        }
    }
}

fn broadcast(sender: &UdpSocket, announcement: &[u8], targets: &[SocketAddr]) {
    for target in targets {
        if let Err(e) = sender.send_to(announcement, target) {
            debug!("broadcast to {target} failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
