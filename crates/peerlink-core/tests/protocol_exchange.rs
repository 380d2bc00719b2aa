//! Integration tests that drive two nodes' state machines against each
//! other through the real codec, with no sockets.
//!
//! Each "node" is a [`DiscoveryTracker`], a [`HandshakeState`] and a
//! [`SessionLifecycle`].  Datagrams are encoded to bytes, optionally dropped,
//! and decoded on the other side, which exercises the same wire path the
//! network engines use.

use std::collections::VecDeque;
use std::net::SocketAddr;

use peerlink_core::protocol::messages::PeerMessage;
use peerlink_core::{
    decode_message, encode_message, DiscoveryPhase, DiscoveryTracker, DiscoveryVerdict,
    HandshakeAction, HandshakeState, NodeIdentity, SessionLifecycle, SessionState,
};

// ── Simulated node ────────────────────────────────────────────────────────────

struct SimNode {
    id: NodeIdentity,
    addr: SocketAddr,
    data_port: u16,
    discovery_port: u16,
    tracker: DiscoveryTracker,
    handshake: HandshakeState,
    lifecycle: SessionLifecycle,
}

impl SimNode {
    fn new(id: &str, peer: &str, ip: &str, data_port: u16, discovery_port: u16) -> Self {
        let id = NodeIdentity::new(id).unwrap();
        let peer = NodeIdentity::new(peer).unwrap();
        let mut lifecycle = SessionLifecycle::new();
        lifecycle.begin_discovery().unwrap();
        let mut tracker = DiscoveryTracker::new(id.clone(), peer);
        tracker.start();
        Self {
            id,
            addr: format!("{ip}:{discovery_port}").parse().unwrap(),
            data_port,
            discovery_port,
            tracker,
            handshake: HandshakeState::new(10),
            lifecycle,
        }
    }

    fn announce(&self) -> Vec<u8> {
        encode_message(&self.tracker.announcement(self.data_port, Some(self.discovery_port)))
            .unwrap()
    }

    /// Feeds one discovery datagram; returns the ACK bytes if one is due.
    fn on_discovery(&mut self, bytes: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        let msg = decode_message(bytes).ok()?;
        let verdict = self.tracker.observe(&msg, from);
        if let DiscoveryVerdict::Found { endpoint, .. } = &verdict {
            self.lifecycle.peer_found(*endpoint).unwrap();
        }
        verdict
            .reply_ack_to()
            .map(|_| encode_message(&self.tracker.acknowledgement(self.data_port)).unwrap())
    }

    /// Feeds one handshake datagram; returns the READY bytes if one is due.
    fn on_handshake_frame(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        match decode_message(bytes).ok()? {
            PeerMessage::Handshake { .. } => {
                self.handshake.on_handshake();
                Some(encode_message(&PeerMessage::Ready { sender_id: self.id.clone() }).unwrap())
            }
            PeerMessage::Ready { .. } => {
                self.handshake.on_ready();
                None
            }
            _ => None,
        }
    }

    fn tick(&mut self) -> Option<Vec<u8>> {
        match self.handshake.on_tick() {
            HandshakeAction::SendHandshake { .. } => {
                Some(encode_message(&PeerMessage::Handshake { sender_id: self.id.clone() }).unwrap())
            }
            HandshakeAction::Complete => {
                if self.lifecycle.state() == SessionState::Handshaking {
                    self.lifecycle.handshake_succeeded(&self.handshake).unwrap();
                }
                None
            }
            HandshakeAction::Failed { .. } => None,
        }
    }
}

/// Runs the handshake phase with an in-flight queue per direction.
/// `drop_first_from_a` loses A's first outgoing frame.
fn run_handshake(a: &mut SimNode, b: &mut SimNode, drop_first_from_a: bool) {
    let mut to_a: VecDeque<Vec<u8>> = VecDeque::new();
    let mut to_b: VecDeque<Vec<u8>> = VecDeque::new();
    let mut dropped = !drop_first_from_a;

    for _ in 0..12 {
        if let Some(frame) = a.tick() {
            if dropped {
                to_b.push_back(frame);
            } else {
                dropped = true;
            }
        }
        if let Some(frame) = b.tick() {
            to_a.push_back(frame);
        }
        while let Some(frame) = to_b.pop_front() {
            if let Some(reply) = b.on_handshake_frame(&frame) {
                to_a.push_back(reply);
            }
        }
        while let Some(frame) = to_a.pop_front() {
            if let Some(reply) = a.on_handshake_frame(&frame) {
                to_b.push_back(reply);
            }
        }
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_discover_then_ack_resolves_both_sides() {
    // Arrange
    let mut a = SimNode::new("NODE1", "NODE2", "10.0.0.1", 45100, 45000);
    let mut b = SimNode::new("NODE2", "NODE1", "10.0.0.2", 45101, 45001);

    // Act: A's broadcast reaches B; B's ACK reaches A
    let ack = b.on_discovery(&a.announce(), a.addr).expect("B must acknowledge");
    let none = a.on_discovery(&ack, b.addr);

    // Assert
    assert!(none.is_none(), "an ACK is never acknowledged");
    assert_eq!(a.tracker.phase(), DiscoveryPhase::Found);
    assert_eq!(b.tracker.phase(), DiscoveryPhase::Found);
    assert_eq!(a.tracker.endpoint().unwrap().data_port, 45101);
    assert_eq!(b.tracker.endpoint().unwrap().data_port, 45100);
}

#[test]
fn test_full_exchange_reaches_connected_in_either_start_order() {
    for a_first in [true, false] {
        // Arrange
        let mut a = SimNode::new("NODE1", "NODE2", "10.0.0.1", 45100, 45000);
        let mut b = SimNode::new("NODE2", "NODE1", "10.0.0.2", 45101, 45001);

        // Act: whichever node broadcasts first, the other answers
        if a_first {
            let ack = b.on_discovery(&a.announce(), a.addr).unwrap();
            a.on_discovery(&ack, b.addr);
        } else {
            let ack = a.on_discovery(&b.announce(), b.addr).unwrap();
            b.on_discovery(&ack, a.addr);
        }
        run_handshake(&mut a, &mut b, false);

        // Assert
        assert_eq!(a.lifecycle.state(), SessionState::Connected, "a_first={a_first}");
        assert_eq!(b.lifecycle.state(), SessionState::Connected, "a_first={a_first}");
        assert!(a.handshake.attempts_made() <= 10);
    }
}

#[test]
fn test_handshake_survives_one_lost_frame() {
    // Arrange
    let mut a = SimNode::new("NODE1", "NODE2", "10.0.0.1", 45100, 45000);
    let mut b = SimNode::new("NODE2", "NODE1", "10.0.0.2", 45101, 45001);
    let ack = b.on_discovery(&a.announce(), a.addr).unwrap();
    a.on_discovery(&ack, b.addr);

    // Act
    run_handshake(&mut a, &mut b, true);

    // Assert
    assert_eq!(a.lifecycle.state(), SessionState::Connected);
    assert_eq!(b.lifecycle.state(), SessionState::Connected);
}

#[test]
fn test_mutual_simultaneous_discovery_does_not_regress() {
    // Arrange
    let mut a = SimNode::new("NODE1", "NODE2", "10.0.0.1", 45100, 45000);
    let mut b = SimNode::new("NODE2", "NODE1", "10.0.0.2", 45101, 45001);

    // Act: both broadcasts cross, then both ACKs cross
    let ack_from_b = b.on_discovery(&a.announce(), a.addr).unwrap();
    let ack_from_a = a.on_discovery(&b.announce(), b.addr).unwrap();
    a.on_discovery(&ack_from_b, b.addr);
    b.on_discovery(&ack_from_a, a.addr);

    // Assert
    assert_eq!(a.lifecycle.state(), SessionState::Handshaking);
    assert_eq!(b.lifecycle.state(), SessionState::Handshaking);
}
