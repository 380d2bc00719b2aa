//! Application layer use cases for a PeerLink node.
//!
//! Use cases in this layer depend on traits and `peerlink_core` types only.
//! They never open sockets; the session engine calls into them.
//!
//! # Sub-modules
//!
//! - **`consume_data`**: the [`consume_data::DataConsumer`] seam plus a
//!   buffered recorder that queues inbound DATA records and persists them to
//!   a pluggable sink from a background worker.
//!
//! - **`handle_commands`**: the [`handle_commands::CommandHandler`] seam plus
//!   the recorder's command set (`OPEN_FILE`, `CLOSE_FILE`, `GET_STATUS`,
//!   `SHUTDOWN`).

pub mod consume_data;
pub mod handle_commands;
