//! Discovery state machine.
//!
//! The tracker decides what an inbound discovery datagram *means*; the
//! network engine in `peerlink-node` owns the sockets and the broadcast
//! timer and simply acts on the returned [`DiscoveryVerdict`].
//!
//! # Rules
//!
//! - Only `DISCOVER` and `ACKNOWLEDGE` from the expected peer identity count.
//!   Anything else, including the node's own looped-back broadcasts, is
//!   ignored and leaves the phase untouched.
//! - A `DISCOVER` from the peer must be answered with `ACKNOWLEDGE`, sent to
//!   the discovery port the peer advertised (or the datagram's source port
//!   when it advertised none).
//! - `Found` is terminal.  Further announcements from the peer yield
//!   [`DiscoveryVerdict::AlreadyFound`] and never replace the endpoint.
//! - Both nodes may discover each other at the same time; there is no leader.

use std::net::SocketAddr;

use serde::Serialize;

use crate::domain::endpoint::PeerEndpoint;
use crate::domain::identity::NodeIdentity;
use crate::protocol::messages::{AcknowledgeMessage, DiscoverMessage, PeerMessage};

/// Progress of discovery for one connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscoveryPhase {
    NotStarted,
    Broadcasting,
    Found,
}

/// Why a datagram did not advance discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// [`DiscoveryTracker::start`] has not been called yet.
    NotStarted,
    /// The node's own broadcast, looped back by the network stack.
    OwnAnnouncement,
    /// A node other than the expected peer.
    UnexpectedSender,
    /// Not a `DISCOVER` or `ACKNOWLEDGE`.
    NotDiscoveryMessage,
}

/// What the engine should do with one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryVerdict {
    Ignored(IgnoreReason),
    /// The peer was found by this datagram.
    Found {
        endpoint: PeerEndpoint,
        /// Destination for an `ACKNOWLEDGE` reply, set when the datagram was
        /// a `DISCOVER`.
        reply_ack_to: Option<SocketAddr>,
    },
    /// The peer was already found; only an acknowledgement may be due.
    AlreadyFound { reply_ack_to: Option<SocketAddr> },
}

impl DiscoveryVerdict {
    pub fn reply_ack_to(&self) -> Option<SocketAddr> {
        match self {
            DiscoveryVerdict::Found { reply_ack_to, .. }
            | DiscoveryVerdict::AlreadyFound { reply_ack_to } => *reply_ack_to,
            DiscoveryVerdict::Ignored(_) => None,
        }
    }
}

/// Tracks discovery of one expected peer.
#[derive(Debug, Clone)]
pub struct DiscoveryTracker {
    local: NodeIdentity,
    expected: NodeIdentity,
    phase: DiscoveryPhase,
    endpoint: Option<PeerEndpoint>,
}

impl DiscoveryTracker {
    pub fn new(local: NodeIdentity, expected: NodeIdentity) -> Self {
        Self {
            local,
            expected,
            phase: DiscoveryPhase::NotStarted,
            endpoint: None,
        }
    }

    /// Moves from `NotStarted` to `Broadcasting`.  Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.phase == DiscoveryPhase::NotStarted {
            self.phase = DiscoveryPhase::Broadcasting;
        }
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    /// The peer endpoint, once found.
    pub fn endpoint(&self) -> Option<PeerEndpoint> {
        self.endpoint
    }

    pub fn local(&self) -> &NodeIdentity {
        &self.local
    }

    pub fn expected(&self) -> &NodeIdentity {
        &self.expected
    }

    /// The `DISCOVER` message broadcast on every tick.
    pub fn announcement(&self, data_port: u16, discovery_port: Option<u16>) -> PeerMessage {
        PeerMessage::Discover(DiscoverMessage {
            sender_id: self.local.clone(),
            data_port,
            discovery_port,
        })
    }

    /// The `ACKNOWLEDGE` reply to a peer's `DISCOVER`.
    pub fn acknowledgement(&self, data_port: u16) -> PeerMessage {
        PeerMessage::Acknowledge(AcknowledgeMessage {
            sender_id: self.local.clone(),
            data_port,
        })
    }

    /// Interprets one decoded datagram received from `source`.
    pub fn observe(&mut self, msg: &PeerMessage, source: SocketAddr) -> DiscoveryVerdict {
        if self.phase == DiscoveryPhase::NotStarted {
            return DiscoveryVerdict::Ignored(IgnoreReason::NotStarted);
        }

        let (sender, data_port, discovery_port, reply_ack_to) = match msg {
            PeerMessage::Discover(d) => {
                let reply_port = d.discovery_port.unwrap_or(source.port());
                (
                    &d.sender_id,
                    d.data_port,
                    d.discovery_port,
                    Some(SocketAddr::new(source.ip(), reply_port)),
                )
            }
            PeerMessage::Acknowledge(a) => (&a.sender_id, a.data_port, None, None),
            _ => return DiscoveryVerdict::Ignored(IgnoreReason::NotDiscoveryMessage),
        };

        if *sender == self.local {
            return DiscoveryVerdict::Ignored(IgnoreReason::OwnAnnouncement);
        }
        if *sender != self.expected {
            return DiscoveryVerdict::Ignored(IgnoreReason::UnexpectedSender);
        }

        if self.phase == DiscoveryPhase::Found {
            return DiscoveryVerdict::AlreadyFound { reply_ack_to };
        }

        let endpoint = PeerEndpoint::new(source.ip(), data_port, discovery_port);
        self.endpoint = Some(endpoint);
        self.phase = DiscoveryPhase::Found;
        DiscoveryVerdict::Found {
            endpoint,
            reply_ack_to,
        }
    }
}
