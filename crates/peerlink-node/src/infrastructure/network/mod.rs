//! Network infrastructure for a PeerLink node.
//!
//! # Sub-modules
//!
//! - **`binder`**: binds the discovery receiver (first free port in the
//!   window, or none for broadcast-only mode), the broadcast sender and the
//!   data socket.  Every socket it returns is non-blocking.
//!
//! - **`discovery`**: broadcasts `DISCOVER` on a fixed interval and polls for
//!   the expected peer's `DISCOVER`/`ACKNOWLEDGE`.
//!
//! - **`handshake`**: the bounded-retry `HANDSHAKE`/`READY` exchange on the
//!   data socket.
//!
//! - **`session`**: the connected session's receive and heartbeat threads.
//!
//! - **`connection_manager`**: [`connection_manager::PeerNode`], which runs
//!   the whole lifecycle loop on its own thread and hands out a
//!   [`connection_manager::NodeHandle`].
//!
//! - **`events`**: [`events::NodeEvent`] notifications and the shared
//!   traffic counters.
//!
//! # Threading model (for beginners)
//!
//! Each engine is a plain OS thread running a poll-then-sleep loop over
//! non-blocking sockets.  Nothing blocks except the short sleep between
//! polls, so every loop notices a cleared `running` flag within one poll
//! interval.  Engines report to async code (the binary's Tokio runtime)
//! through a bounded `tokio::sync::mpsc` channel using `try_send`, which
//! never blocks the engine thread.

pub mod binder;
pub mod connection_manager;
pub mod discovery;
pub mod events;
pub mod handshake;
pub mod session;
