//! # peerlink-core
//!
//! Shared library for PeerLink containing the text wire protocol, node
//! identities, and the pure state machines that drive discovery, handshake,
//! and the live session.
//!
//! This crate has zero dependencies on OS sockets or threads.  Everything
//! here can be exercised with plain values and injected timestamps, which
//! is what makes the state machines testable without a network.
//!
//! # Architecture overview (for beginners)
//!
//! PeerLink connects exactly two processes on the same LAN.  Neither side
//! knows the other's address up front, so each node:
//!
//! 1. **Discovers** the counterpart by broadcasting `DISCOVER` datagrams over
//!    a small window of well-known ports and listening for a `DISCOVER` or
//!    `ACKNOWLEDGE` from the expected identity.
//! 2. **Handshakes** with it: both sides send `HANDSHAKE` and answer every
//!    `HANDSHAKE` they receive with `READY`.  The exchange succeeds only when
//!    a node has both *sent and been acknowledged* and *received*.
//! 3. **Runs a session**: commands, telemetry data, and heartbeats flow over
//!    the data port until one side shuts down or goes silent.
//!
//! This crate defines:
//!
//! - **`protocol`**: the `TYPE:field:field` message format and its codec.
//! - **`domain`**: identities, endpoints, settings, and the discovery,
//!   handshake, heartbeat, and session-lifecycle state machines.

pub mod domain;
pub mod protocol;

pub use domain::discovery::{DiscoveryPhase, DiscoveryTracker, DiscoveryVerdict, IgnoreReason};
pub use domain::endpoint::PeerEndpoint;
pub use domain::handshake::{HandshakeAction, HandshakeState};
pub use domain::heartbeat::HeartbeatTimer;
pub use domain::identity::{IdentityError, NodeIdentity};
pub use domain::session::{
    DisconnectReason, SessionHandle, SessionId, SessionLifecycle, SessionState, TransitionError,
};
pub use domain::settings::{LinkSettings, SettingsError};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::{MessageType, PeerMessage};
