//! All PeerLink protocol message types.
//!
//! Every datagram carries exactly one message encoded as ASCII text:
//!
//! ```text
//! TYPE:field1:field2:...
//! ```
//!
//! Fixed fields (identities, ports, command and status names) never contain
//! the `:` delimiter.  The final field of `COMMAND`, `STATUS`, and `DATA` is
//! free-form and runs to the end of the datagram, so it may contain colons.

use serde::{Deserialize, Serialize};

use crate::domain::identity::NodeIdentity;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Field delimiter used on the wire.
pub const FIELD_DELIMITER: char = ':';

/// Largest datagram either side will send or accept, in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Well-known command names understood by the recorder node.
pub mod commands {
    pub const OPEN_FILE: &str = "OPEN_FILE";
    pub const CLOSE_FILE: &str = "CLOSE_FILE";
    pub const GET_STATUS: &str = "GET_STATUS";
    pub const SHUTDOWN: &str = "SHUTDOWN";
}

/// Well-known status names sent in reply to commands.
pub mod statuses {
    pub const FILE_OPENED: &str = "FILE_OPENED";
    pub const FILE_OPEN_FAILED: &str = "FILE_OPEN_FAILED";
    pub const FILE_CLOSED: &str = "FILE_CLOSED";
    pub const RUNNING: &str = "RUNNING";
    pub const SHUTTING_DOWN: &str = "SHUTTING_DOWN";
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
}

// ── Message type tags ─────────────────────────────────────────────────────────

/// The leading `TYPE` tag of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Discover,
    Acknowledge,
    Handshake,
    Ready,
    Command,
    Status,
    Data,
    KeepAlive,
    Disconnect,
}

impl MessageType {
    /// All message types, in wire-table order.
    pub const ALL: [MessageType; 9] = [
        MessageType::Discover,
        MessageType::Acknowledge,
        MessageType::Handshake,
        MessageType::Ready,
        MessageType::Command,
        MessageType::Status,
        MessageType::Data,
        MessageType::KeepAlive,
        MessageType::Disconnect,
    ];

    /// Canonical tag written by the encoder.
    pub fn as_tag(self) -> &'static str {
        match self {
            MessageType::Discover => "DISCOVER",
            MessageType::Acknowledge => "ACKNOWLEDGE",
            MessageType::Handshake => "HANDSHAKE",
            MessageType::Ready => "READY",
            MessageType::Command => "COMMAND",
            MessageType::Status => "STATUS",
            MessageType::Data => "DATA",
            MessageType::KeepAlive => "KEEPALIVE",
            MessageType::Disconnect => "DISCONNECT",
        }
    }

    /// Parses a wire tag.  Tags are case-sensitive.
    ///
    /// Older nodes abbreviate `ACKNOWLEDGE` as `ACK` and `COMMAND` as `CMD`;
    /// both spellings are accepted here.
    pub fn from_tag(tag: &str) -> Option<MessageType> {
        match tag {
            "DISCOVER" => Some(MessageType::Discover),
            "ACKNOWLEDGE" | "ACK" => Some(MessageType::Acknowledge),
            "HANDSHAKE" => Some(MessageType::Handshake),
            "READY" => Some(MessageType::Ready),
            "COMMAND" | "CMD" => Some(MessageType::Command),
            "STATUS" => Some(MessageType::Status),
            "DATA" => Some(MessageType::Data),
            "KEEPALIVE" => Some(MessageType::KeepAlive),
            "DISCONNECT" => Some(MessageType::Disconnect),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

// ── Message payloads ──────────────────────────────────────────────────────────

/// Presence announcement broadcast across the discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverMessage {
    pub sender_id: NodeIdentity,
    /// Port the sender receives session traffic on.
    pub data_port: u16,
    /// Port the sender's discovery receiver is bound to.  `None` when the
    /// sender runs in broadcast-only mode.
    pub discovery_port: Option<u16>,
}

/// Unicast reply to a `DISCOVER` from the expected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    pub sender_id: NodeIdentity,
    pub data_port: u16,
}

/// Request for the receiving node to perform an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub name: String,
    /// Everything after the command name, verbatim.
    pub args: Option<String>,
}

impl CommandMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }

    pub fn with_args(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Some(args.into()),
        }
    }
}

/// Reply to a [`CommandMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub name: String,
    /// Everything after the status name, verbatim.
    pub details: Option<String>,
}

impl StatusReply {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: None,
        }
    }

    pub fn with_details(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: Some(details.into()),
        }
    }
}

impl std::fmt::Display for StatusReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}:{}", self.name, details),
            None => f.write_str(&self.name),
        }
    }
}

/// One application telemetry sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub payload_type: String,
    /// Everything after the payload type, verbatim.
    pub value: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message that can travel between two PeerLink nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Discover(DiscoverMessage),
    Acknowledge(AcknowledgeMessage),
    Handshake { sender_id: NodeIdentity },
    Ready { sender_id: NodeIdentity },
    Command(CommandMessage),
    Status(StatusReply),
    Data(DataMessage),
    KeepAlive { sender_id: NodeIdentity },
    Disconnect { sender_id: NodeIdentity },
}

impl PeerMessage {
    /// Returns the [`MessageType`] tag for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::Discover(_) => MessageType::Discover,
            PeerMessage::Acknowledge(_) => MessageType::Acknowledge,
            PeerMessage::Handshake { .. } => MessageType::Handshake,
            PeerMessage::Ready { .. } => MessageType::Ready,
            PeerMessage::Command(_) => MessageType::Command,
            PeerMessage::Status(_) => MessageType::Status,
            PeerMessage::Data(_) => MessageType::Data,
            PeerMessage::KeepAlive { .. } => MessageType::KeepAlive,
            PeerMessage::Disconnect { .. } => MessageType::Disconnect,
        }
    }

    /// The identity carried by the message, for message types that carry one.
    pub fn sender_id(&self) -> Option<&NodeIdentity> {
        match self {
            PeerMessage::Discover(m) => Some(&m.sender_id),
            PeerMessage::Acknowledge(m) => Some(&m.sender_id),
            PeerMessage::Handshake { sender_id }
            | PeerMessage::Ready { sender_id }
            | PeerMessage::KeepAlive { sender_id }
            | PeerMessage::Disconnect { sender_id } => Some(sender_id),
            PeerMessage::Command(_) | PeerMessage::Status(_) | PeerMessage::Data(_) => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
