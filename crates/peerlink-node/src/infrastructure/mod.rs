//! Infrastructure layer for a PeerLink node.
//!
//! Contains OS-facing adapters: UDP sockets and the protocol engines built on
//! them, the bundled record sinks, and file-system configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `peerlink_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.

pub mod network;
pub mod recording;
pub mod storage;
