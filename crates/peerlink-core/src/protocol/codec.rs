//! Text codec for encoding and decoding PeerLink protocol messages.
//!
//! Wire format (one message per datagram, ASCII only):
//! ```text
//! DISCOVER:<sender_id>:<data_port>[:<discovery_port>]
//! ACKNOWLEDGE:<sender_id>:<data_port>
//! HANDSHAKE:<sender_id>
//! READY:<sender_id>
//! COMMAND:<name>[:<args...>]
//! STATUS:<name>[:<details...>]
//! DATA:<payload_type>:<value...>
//! KEEPALIVE:<sender_id>
//! DISCONNECT:<sender_id>
//! ```
//!
//! A trailing CR and/or LF is tolerated on decode so that frames typed into
//! `nc -u` or sent by line-oriented tools still parse.

use thiserror::Error;

use crate::domain::identity::{IdentityError, NodeIdentity};
use crate::protocol::messages::{
    AcknowledgeMessage, CommandMessage, DataMessage, DiscoverMessage, MessageType, PeerMessage,
    StatusReply, FIELD_DELIMITER, MAX_DATAGRAM_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    /// The datagram carried no bytes (or only line terminators).
    #[error("empty datagram")]
    Empty,

    /// The datagram exceeds [`MAX_DATAGRAM_SIZE`].
    #[error("datagram of {size} bytes exceeds the {max}-byte limit")]
    TooLarge { size: usize, max: usize },

    /// The datagram contains bytes outside 7-bit ASCII.
    #[error("datagram is not ASCII text")]
    NotAscii,

    /// The datagram has no `:` and is not a bare known type tag.
    #[error("missing ':' delimiter")]
    MissingDelimiter,

    /// The leading tag is not a known message type.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// A required field is absent or empty.
    #[error("{message} is missing field `{field}`")]
    MissingField {
        message: MessageType,
        field: &'static str,
    },

    /// More fields than the message type allows.
    #[error("{message} has {extra} unexpected trailing field(s)")]
    UnexpectedFields { message: MessageType, extra: usize },

    /// A port field is not an integer in `1..=65535`.
    #[error("invalid port in field `{field}`: {value:?}")]
    InvalidPort { field: &'static str, value: String },

    /// A sender identity failed validation.
    #[error("invalid sender identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// A fixed field handed to the encoder is empty or contains `:`, or an
    /// optional field in a received frame is present but empty.
    #[error("field `{field}` must be non-empty and must not contain ':'")]
    InvalidField { field: &'static str },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`PeerMessage`] into the bytes of one datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] when a fixed field (command name,
/// status name, payload type) is empty or contains the delimiter,
/// [`ProtocolError::NotAscii`] when any field is non-ASCII, and
/// [`ProtocolError::TooLarge`] when the frame would not fit in one datagram.
///
/// # Examples
///
/// ```rust
/// use peerlink_core::protocol::{decode_message, encode_message, PeerMessage};
/// use peerlink_core::NodeIdentity;
///
/// let msg = PeerMessage::KeepAlive { sender_id: NodeIdentity::new("NODE1").unwrap() };
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(bytes, b"KEEPALIVE:NODE1");
/// assert_eq!(decode_message(&bytes).unwrap(), msg);
/// ```
pub fn encode_message(msg: &PeerMessage) -> Result<Vec<u8>, ProtocolError> {
    let tag = msg.message_type().as_tag();
    let text = match msg {
        PeerMessage::Discover(m) => match m.discovery_port {
            Some(disc) => format!("{tag}:{}:{}:{disc}", m.sender_id, m.data_port),
            None => format!("{tag}:{}:{}", m.sender_id, m.data_port),
        },
        PeerMessage::Acknowledge(m) => format!("{tag}:{}:{}", m.sender_id, m.data_port),
        PeerMessage::Handshake { sender_id }
        | PeerMessage::Ready { sender_id }
        | PeerMessage::KeepAlive { sender_id }
        | PeerMessage::Disconnect { sender_id } => format!("{tag}:{sender_id}"),
        PeerMessage::Command(c) => {
            with_tail(tag, fixed("command_name", &c.name)?, c.args.as_deref())
        }
        PeerMessage::Status(s) => {
            with_tail(tag, fixed("status_name", &s.name)?, s.details.as_deref())
        }
        PeerMessage::Data(d) => format!(
            "{tag}:{}:{}",
            fixed("payload_type", &d.payload_type)?,
            d.value
        ),
    };

    check_frame(text.as_bytes())?;
    Ok(text.into_bytes())
}

/// Encodes a message from its type and raw field strings, validating that
/// the result is a well-formed frame of that type.
///
/// This backs the session's `send(type, fields...)` surface, where callers
/// build frames from loose strings rather than typed payloads.
///
/// # Errors
///
/// Returns whatever [`decode_message`] would report for the assembled frame.
pub fn encode_fields(message_type: MessageType, fields: &[&str]) -> Result<Vec<u8>, ProtocolError> {
    let mut text = String::from(message_type.as_tag());
    for field in fields {
        text.push(FIELD_DELIMITER);
        text.push_str(field);
    }
    let bytes = text.into_bytes();
    decode_message(&bytes)?;
    Ok(bytes)
}

/// Decodes the single [`PeerMessage`] carried by `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the datagram is malformed.
///
/// # Examples
///
/// ```rust
/// use peerlink_core::protocol::{decode_message, ProtocolError};
///
/// assert_eq!(decode_message(b"GARBAGE"), Err(ProtocolError::MissingDelimiter));
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<PeerMessage, ProtocolError> {
    check_frame(bytes)?;
    // ASCII was checked above, so this cannot fail.
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotAscii)?;
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let Some((tag, rest)) = text.split_once(FIELD_DELIMITER) else {
        return match MessageType::from_tag(text) {
            Some(ty) => Err(ProtocolError::MissingField {
                message: ty,
                field: first_field_name(ty),
            }),
            None => Err(ProtocolError::MissingDelimiter),
        };
    };

    let ty =
        MessageType::from_tag(tag).ok_or_else(|| ProtocolError::UnknownType(tag.to_string()))?;

    match ty {
        MessageType::Discover => {
            let mut fields = Fields::new(ty, rest);
            let sender_id = fields.identity()?;
            let data_port = fields.port("data_port")?;
            let discovery_port = match fields.optional("discovery_port")? {
                Some(raw) => Some(parse_port("discovery_port", raw)?),
                None => None,
            };
            fields.finish()?;
            Ok(PeerMessage::Discover(DiscoverMessage {
                sender_id,
                data_port,
                discovery_port,
            }))
        }
        MessageType::Acknowledge => {
            let mut fields = Fields::new(ty, rest);
            let sender_id = fields.identity()?;
            let data_port = fields.port("data_port")?;
            fields.finish()?;
            Ok(PeerMessage::Acknowledge(AcknowledgeMessage {
                sender_id,
                data_port,
            }))
        }
        MessageType::Handshake
        | MessageType::Ready
        | MessageType::KeepAlive
        | MessageType::Disconnect => {
            let mut fields = Fields::new(ty, rest);
            let sender_id = fields.identity()?;
            fields.finish()?;
            Ok(match ty {
                MessageType::Handshake => PeerMessage::Handshake { sender_id },
                MessageType::Ready => PeerMessage::Ready { sender_id },
                MessageType::KeepAlive => PeerMessage::KeepAlive { sender_id },
                _ => PeerMessage::Disconnect { sender_id },
            })
        }
        MessageType::Command => {
            let (name, args) = split_head(ty, "command_name", rest)?;
            Ok(PeerMessage::Command(CommandMessage {
                name: name.to_string(),
                args: args.filter(|a| !a.is_empty()).map(str::to_string),
            }))
        }
        MessageType::Status => {
            let (name, details) = split_head(ty, "status_name", rest)?;
            Ok(PeerMessage::Status(StatusReply {
                name: name.to_string(),
                details: details.filter(|d| !d.is_empty()).map(str::to_string),
            }))
        }
        MessageType::Data => {
            let (payload_type, value) = split_head(ty, "payload_type", rest)?;
            let value = value.ok_or(ProtocolError::MissingField {
                message: ty,
                field: "value",
            })?;
            Ok(PeerMessage::Data(DataMessage {
                payload_type: payload_type.to_string(),
                value: value.to_string(),
            }))
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn check_frame(bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    if !bytes.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    Ok(())
}

fn fixed<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ProtocolError> {
    if value.is_empty() || value.contains(FIELD_DELIMITER) {
        return Err(ProtocolError::InvalidField { field });
    }
    Ok(value)
}

fn with_tail(tag: &str, head: &str, tail: Option<&str>) -> String {
    match tail {
        Some(tail) => format!("{tag}:{head}:{tail}"),
        None => format!("{tag}:{head}"),
    }
}

fn first_field_name(ty: MessageType) -> &'static str {
    match ty {
        MessageType::Command => "command_name",
        MessageType::Status => "status_name",
        MessageType::Data => "payload_type",
        _ => "sender_id",
    }
}

/// Splits `rest` into a required head field and the free-form remainder.
fn split_head<'a>(
    ty: MessageType,
    field: &'static str,
    rest: &'a str,
) -> Result<(&'a str, Option<&'a str>), ProtocolError> {
    let (head, tail) = match rest.split_once(FIELD_DELIMITER) {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };
    if head.is_empty() {
        return Err(ProtocolError::MissingField { message: ty, field });
    }
    Ok((head, tail))
}

fn parse_port(field: &'static str, raw: &str) -> Result<u16, ProtocolError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ProtocolError::InvalidPort {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Cursor over the fixed, colon-separated fields of one message.
struct Fields<'a> {
    ty: MessageType,
    parts: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(ty: MessageType, rest: &'a str) -> Self {
        Self {
            ty,
            parts: rest.split(FIELD_DELIMITER),
        }
    }

    fn required(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        match self.parts.next() {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ProtocolError::MissingField {
                message: self.ty,
                field,
            }),
        }
    }

    /// An absent field is `None`; a present but empty one is malformed.
    fn optional(&mut self, field: &'static str) -> Result<Option<&'a str>, ProtocolError> {
        match self.parts.next() {
            Some("") => Err(ProtocolError::InvalidField { field }),
            other => Ok(other),
        }
    }

    fn identity(&mut self) -> Result<NodeIdentity, ProtocolError> {
        let raw = self.required("sender_id")?;
        Ok(NodeIdentity::new(raw)?)
    }

    fn port(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        let raw = self.required(field)?;
        parse_port(field, raw)
    }

    fn finish(mut self) -> Result<(), ProtocolError> {
        let extra = self.parts.by_ref().count();
        if extra > 0 {
            return Err(ProtocolError::UnexpectedFields {
                message: self.ty,
                extra,
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::commands;

    fn id(s: &str) -> NodeIdentity {
        NodeIdentity::new(s).unwrap()
    }

    // ── Decoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_discover_with_discovery_port() {
        // Arrange
        let frame = b"DISCOVER:NODE1:45100:45003";

        // Act
        let msg = decode_message(frame).unwrap();

        // Assert
        assert_eq!(
            msg,
            PeerMessage::Discover(DiscoverMessage {
                sender_id: id("NODE1"),
                data_port: 45100,
                discovery_port: Some(45003),
            })
        );
    }

    #[test]
    fn test_decode_discover_without_discovery_port_for_broadcast_only_sender() {
        let msg = decode_message(b"DISCOVER:NODE2:45101").unwrap();
        match msg {
            PeerMessage::Discover(d) => assert_eq!(d.discovery_port, None),
            other => panic!("expected Discover, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_legacy_ack_tag() {
        let msg = decode_message(b"ACK:AIMLAB_UNITY:45100").unwrap();
        assert_eq!(
            msg,
            PeerMessage::Acknowledge(AcknowledgeMessage {
                sender_id: id("AIMLAB_UNITY"),
                data_port: 45100,
            })
        );
    }

    #[test]
    fn test_decode_legacy_cmd_tag_with_colon_in_args() {
        // Arrange: the args tail is free-form and keeps its colons
        let frame = b"CMD:OPEN_FILE:session:7";

        // Act
        let msg = decode_message(frame).unwrap();

        // Assert
        assert_eq!(
            msg,
            PeerMessage::Command(CommandMessage::with_args(commands::OPEN_FILE, "session:7"))
        );
    }

    #[test]
    fn test_decode_status_running_keeps_details_verbatim() {
        let frame = b"STATUS:RUNNING:file_open=true,filename=a.csv,data_count=3,files_created=1";
        let msg = decode_message(frame).unwrap();
        assert_eq!(
            msg,
            PeerMessage::Status(StatusReply::with_details(
                "RUNNING",
                "file_open=true,filename=a.csv,data_count=3,files_created=1"
            ))
        );
    }

    #[test]
    fn test_decode_data_value_may_contain_delimiters() {
        let msg = decode_message(b"DATA:POSITION:1.0:2.5:-3.25").unwrap();
        assert_eq!(
            msg,
            PeerMessage::Data(DataMessage {
                payload_type: "POSITION".to_string(),
                value: "1.0:2.5:-3.25".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let msg = decode_message(b"KEEPALIVE:NODE2\r\n").unwrap();
        assert_eq!(msg, PeerMessage::KeepAlive { sender_id: id("NODE2") });
    }

    // ── Decoding errors ───────────────────────────────────────────────────────

    #[test]
    fn test_decode_garbage_reports_missing_delimiter() {
        assert_eq!(decode_message(b"GARBAGE"), Err(ProtocolError::MissingDelimiter));
    }

    #[test]
    fn test_decode_bare_known_tag_reports_missing_field() {
        assert_eq!(
            decode_message(b"HANDSHAKE"),
            Err(ProtocolError::MissingField {
                message: MessageType::Handshake,
                field: "sender_id",
            })
        );
    }

    #[test]
    fn test_decode_empty_and_newline_only_are_empty() {
        assert_eq!(decode_message(b""), Err(ProtocolError::Empty));
        assert_eq!(decode_message(b"\n"), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_message(b"HELLO:NODE1"),
            Err(ProtocolError::UnknownType("HELLO".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_zero_and_non_numeric_ports() {
        assert!(matches!(
            decode_message(b"DISCOVER:NODE1:0"),
            Err(ProtocolError::InvalidPort { field: "data_port", .. })
        ));
        assert!(matches!(
            decode_message(b"ACK:NODE1:http"),
            Err(ProtocolError::InvalidPort { .. })
        ));
        assert!(matches!(
            decode_message(b"DISCOVER:NODE1:45100:70000"),
            Err(ProtocolError::InvalidPort { field: "discovery_port", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_empty_trailing_discovery_port() {
        assert_eq!(
            decode_message(b"DISCOVER:NODE1:45100:"),
            Err(ProtocolError::InvalidField {
                field: "discovery_port"
            })
        );
        assert!(decode_message(b"DISCOVER:NODE1:45100").is_ok());
    }

    #[test]
    fn test_decode_rejects_trailing_fields_on_fixed_messages() {
        assert_eq!(
            decode_message(b"READY:NODE1:extra"),
            Err(ProtocolError::UnexpectedFields {
                message: MessageType::Ready,
                extra: 1,
            })
        );
    }

    #[test]
    fn test_decode_rejects_non_ascii() {
        assert_eq!(
            decode_message("DATA:NOTE:caf\u{e9}".as_bytes()),
            Err(ProtocolError::NotAscii)
        );
    }

    #[test]
    fn test_decode_rejects_oversized_datagram() {
        let frame = vec![b'A'; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            decode_message(&frame),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_data_without_value_is_missing_field() {
        assert_eq!(
            decode_message(b"DATA:POSITION"),
            Err(ProtocolError::MissingField {
                message: MessageType::Data,
                field: "value",
            })
        );
    }

    #[test]
    fn test_decode_rejects_identity_with_whitespace() {
        assert!(matches!(
            decode_message(b"HANDSHAKE:NODE 1"),
            Err(ProtocolError::InvalidIdentity(_))
        ));
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_writes_canonical_acknowledge_tag() {
        let msg = PeerMessage::Acknowledge(AcknowledgeMessage {
            sender_id: id("NODE2"),
            data_port: 45101,
        });
        assert_eq!(encode_message(&msg).unwrap(), b"ACKNOWLEDGE:NODE2:45101");
    }

    #[test]
    fn test_encode_rejects_command_name_containing_delimiter() {
        let msg = PeerMessage::Command(CommandMessage::new("OPEN:FILE"));
        assert_eq!(
            encode_message(&msg),
            Err(ProtocolError::InvalidField { field: "command_name" })
        );
    }

    #[test]
    fn test_encode_rejects_oversized_data_value() {
        let msg = PeerMessage::Data(DataMessage {
            payload_type: "BLOB".to_string(),
            value: "x".repeat(MAX_DATAGRAM_SIZE),
        });
        assert!(matches!(encode_message(&msg), Err(ProtocolError::TooLarge { .. })));
    }

    #[test]
    fn test_encode_fields_builds_and_validates_frame() {
        // Act
        let ok = encode_fields(MessageType::Data, &["HEALTH", "100"]);
        let bad = encode_fields(MessageType::Discover, &["NODE1", "not-a-port"]);

        // Assert
        assert_eq!(ok.unwrap(), b"DATA:HEALTH:100");
        assert!(matches!(bad, Err(ProtocolError::InvalidPort { .. })));
    }
}
