//! Envelope - the wire format wrapper for all Duelink messages.
//!
//! Two frame shapes travel over the transport as UTF-8 text:
//!
//! ```text
//! MSG|<id>|<TYPE>|<true|false>|<epochMillis>|<version>|<payload>
//! ACK|<id>
//! ```
//!
//! Inside the payload `\` is written as `\\` and `|` as `\|`, so any string
//! (including one that itself contains separators) survives a round trip.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::{DuelError, MessageId};

/// Current protocol version stamped on every outgoing message.
pub const PROTOCOL_VERSION: u32 = 1;

const MSG_TAG: &str = "MSG";
const ACK_TAG: &str = "ACK";

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Ask the peer for its slot summary
    StateSyncRequest,
    /// Slot summary answering a sync request
    StateSyncResponse,
    /// Card preview (stats withheld) or full card
    CardSelected,
    /// Card artwork for the selected card
    ImageTransfer,
    /// Ask the peer to resend its artwork
    ImageRequest,
    /// The sender clicked ready
    PlayerReady,
    /// The sender holds all of the receiver's card data
    ReadyAck,
    /// The sender gave up waiting for the commit
    ReadyTimeout,
    /// Host announces the revealed pairing
    RevealStart,
    /// Host starts streaming the battle story
    BattleStart,
    /// One indexed story segment
    StorySegment,
    /// Final verdict from the host's perspective
    BattleResult,
    /// Acknowledgement (payload carries the target id)
    Ack,
    /// Keepalive probe
    Ping,
    /// Keepalive answer
    Pong,
}

impl MessageType {
    /// Every message type, in wire-table order.
    pub const ALL: [MessageType; 15] = [
        MessageType::StateSyncRequest,
        MessageType::StateSyncResponse,
        MessageType::CardSelected,
        MessageType::ImageTransfer,
        MessageType::ImageRequest,
        MessageType::PlayerReady,
        MessageType::ReadyAck,
        MessageType::ReadyTimeout,
        MessageType::RevealStart,
        MessageType::BattleStart,
        MessageType::StorySegment,
        MessageType::BattleResult,
        MessageType::Ack,
        MessageType::Ping,
        MessageType::Pong,
    ];

    /// The wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::StateSyncRequest => "STATE_SYNC_REQUEST",
            MessageType::StateSyncResponse => "STATE_SYNC_RESPONSE",
            MessageType::CardSelected => "CARD_SELECTED",
            MessageType::ImageTransfer => "IMAGE_TRANSFER",
            MessageType::ImageRequest => "IMAGE_REQUEST",
            MessageType::PlayerReady => "PLAYER_READY",
            MessageType::ReadyAck => "READY_ACK",
            MessageType::ReadyTimeout => "READY_TIMEOUT",
            MessageType::RevealStart => "REVEAL_START",
            MessageType::BattleStart => "BATTLE_START",
            MessageType::StorySegment => "STORY_SEGMENT",
            MessageType::BattleResult => "BATTLE_RESULT",
            MessageType::Ack => "ACK",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DuelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| DuelError::InvalidMessageType(value.to_string()))
    }
}

/// A message carried with at-most-once delivery semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableMessage {
    /// Unique per sent instance
    pub message_id: MessageId,
    /// Type discriminator
    pub msg_type: MessageType,
    /// JSON payload (or target id for acknowledgements)
    pub payload: String,
    /// Whether the receiver must acknowledge
    pub requires_ack: bool,
    /// Unix timestamp (milliseconds) - informational only, not trusted
    pub sent_at: u64,
    /// Protocol version of the sender
    pub version: u32,
}

impl ReliableMessage {
    /// Create a new message with a fresh id and the current timestamp.
    pub fn new(msg_type: MessageType, payload: impl Into<String>, requires_ack: bool) -> Self {
        Self {
            message_id: MessageId::new(),
            msg_type,
            payload: payload.into(),
            requires_ack,
            sent_at: now_millis(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a message whose payload is the JSON encoding of `body`.
    pub fn with_body<T: Serialize>(
        msg_type: MessageType,
        body: &T,
        requires_ack: bool,
    ) -> Result<Self, DuelError> {
        let payload = serde_json::to_string(body).map_err(DuelError::Serialization)?;
        Ok(Self::new(msg_type, payload, requires_ack))
    }

    /// Decode the JSON payload as `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, DuelError> {
        serde_json::from_str(&self.payload).map_err(DuelError::Deserialization)
    }

    /// Decode the JSON payload, checking the message type first.
    pub fn body_of<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T, DuelError> {
        if self.msg_type != expected {
            return Err(DuelError::UnexpectedType {
                expected: expected.to_string(),
                actual: self.msg_type.to_string(),
            });
        }
        self.body()
    }

    /// Encode as a `MSG|...` frame.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            MSG_TAG,
            self.message_id,
            self.msg_type,
            self.requires_ack,
            self.sent_at,
            self.version,
            escape_payload(&self.payload)
        )
    }
}

/// One decoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A regular message
    Message(ReliableMessage),
    /// Acknowledgement of the given message id
    Ack(MessageId),
}

impl Frame {
    /// Encode the frame as text.
    pub fn encode(&self) -> String {
        match self {
            Frame::Message(msg) => msg.encode(),
            Frame::Ack(id) => format!("{}|{}", ACK_TAG, id),
        }
    }

    /// Encode the frame as transport bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Decode transport bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DuelError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DuelError::NotUtf8)?;
        text.parse()
    }

    /// Build the acknowledgement for a received message.
    pub fn ack_for(msg: &ReliableMessage) -> Self {
        Frame::Ack(msg.message_id.clone())
    }
}

impl FromStr for Frame {
    type Err = DuelError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (tag, rest) = text
            .split_once('|')
            .ok_or_else(|| DuelError::Malformed("missing frame tag".into()))?;

        match tag {
            ACK_TAG => MessageId::parse(rest)
                .map(Frame::Ack)
                .ok_or_else(|| DuelError::Malformed(format!("invalid ack target: {:?}", rest))),
            MSG_TAG => {
                let msg = parse_message(rest)?;
                // A MSG envelope of type ACK acknowledges the id in its payload.
                if msg.msg_type == MessageType::Ack {
                    MessageId::parse(&msg.payload)
                        .map(Frame::Ack)
                        .ok_or_else(|| DuelError::Malformed("ACK message without target".into()))
                } else {
                    Ok(Frame::Message(msg))
                }
            }
            other => Err(DuelError::Malformed(format!("unknown frame tag: {:?}", other))),
        }
    }
}

fn parse_message(rest: &str) -> Result<ReliableMessage, DuelError> {
    // Header fields never contain the separator, so the payload is whatever
    // follows the fifth one verbatim.
    let mut fields = rest.splitn(6, '|');
    let mut next = |name: &str| {
        fields
            .next()
            .ok_or_else(|| DuelError::Malformed(format!("missing field: {}", name)))
    };

    let id = next("id")?;
    let msg_type = next("type")?;
    let requires_ack = next("requiresAck")?;
    let sent_at = next("sentAt")?;
    let version = next("version")?;
    let payload = next("payload")?;

    let message_id = MessageId::parse(id)
        .ok_or_else(|| DuelError::Malformed(format!("invalid message id: {:?}", id)))?;
    let msg_type: MessageType = msg_type.parse()?;
    let requires_ack = match requires_ack {
        "true" => true,
        "false" => false,
        other => {
            return Err(DuelError::Malformed(format!(
                "invalid requiresAck flag: {:?}",
                other
            )))
        }
    };
    let sent_at = sent_at
        .parse::<u64>()
        .map_err(|_| DuelError::Malformed(format!("invalid sentAt: {:?}", sent_at)))?;
    let version = version
        .parse::<u32>()
        .map_err(|_| DuelError::Malformed(format!("invalid version: {:?}", version)))?;
    if version == 0 || version > PROTOCOL_VERSION {
        return Err(DuelError::UnsupportedVersion(version));
    }

    Ok(ReliableMessage {
        message_id,
        msg_type,
        payload: unescape_payload(payload)?,
        requires_ack,
        sent_at,
        version,
    })
}

fn escape_payload(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    for c in payload.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_payload(raw: &str) -> Result<String, DuelError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('\\' | '|')) => out.push(escaped),
                Some(other) => {
                    return Err(DuelError::Malformed(format!(
                        "invalid escape sequence: \\{}",
                        other
                    )))
                }
                None => return Err(DuelError::Malformed("dangling escape".into())),
            },
            '|' => return Err(DuelError::Malformed("unescaped separator in payload".into())),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &ReliableMessage) -> ReliableMessage {
        let frame = Frame::Message(msg.clone());
        match Frame::from_bytes(&frame.to_bytes()).unwrap() {
            Frame::Message(restored) => restored,
            other => panic!("Expected message frame, got {:?}", other),
        }
    }

    #[test]
    fn message_roundtrip() {
        let msg = ReliableMessage::new(MessageType::PlayerReady, "{\"card_id\":\"c1\"}", true);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn payload_with_separators_roundtrips() {
        let msg = ReliableMessage::new(MessageType::StorySegment, "a|b||c\\|d\\", false);
        let encoded = msg.encode();
        assert!(encoded.ends_with("a\\|b\\|\\|c\\\\\\|d\\\\"));
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn unicode_payload_roundtrips() {
        let msg = ReliableMessage::new(MessageType::CardSelected, "ドラゴン 🐉 | épée", true);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let msg = ReliableMessage::new(MessageType::Ping, "", false);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn wire_layout_matches_protocol() {
        let msg = ReliableMessage {
            message_id: MessageId::parse("m-1").unwrap(),
            msg_type: MessageType::ReadyAck,
            payload: "x|y".into(),
            requires_ack: true,
            sent_at: 1705000000000,
            version: 1,
        };
        assert_eq!(msg.encode(), "MSG|m-1|READY_ACK|true|1705000000000|1|x\\|y");
    }

    #[test]
    fn ack_frame_roundtrip() {
        let id = MessageId::new();
        let frame = Frame::Ack(id.clone());
        assert_eq!(frame.encode(), format!("ACK|{}", id));
        assert_eq!(Frame::from_bytes(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn ack_typed_message_is_an_ack() {
        let text = "MSG|m-2|ACK|false|0|1|target-9";
        let frame: Frame = text.parse().unwrap();
        assert_eq!(frame, Frame::Ack(MessageId::parse("target-9").unwrap()));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for bad in [
            "",
            "HELLO",
            "ACK|",
            "ACK|a|b",
            "MSG|id|PLAYER_READY|true|0|1",
            "MSG|id|NOPE|true|0|1|x",
            "MSG|id|PING|yes|0|1|x",
            "MSG|id|PING|true|abc|1|x",
            "MSG|id|PING|true|0|x|x",
            "MSG|id|PING|true|0|1|a|b",
            "MSG|id|PING|true|0|1|bad\\escape",
            "MSG||PING|true|0|1|x",
        ] {
            assert!(bad.parse::<Frame>().is_err(), "should reject {:?}", bad);
        }
    }

    #[test]
    fn future_version_is_rejected() {
        let text = format!("MSG|id|PING|false|0|{}|x", PROTOCOL_VERSION + 1);
        assert!(matches!(
            text.parse::<Frame>(),
            Err(DuelError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn non_utf8_is_rejected() {
        assert!(matches!(
            Frame::from_bytes(&[0xff, 0xfe, b'|']),
            Err(DuelError::NotUtf8)
        ));
    }

    #[test]
    fn message_type_names_roundtrip() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!("card_selected".parse::<MessageType>().is_err());
    }

    #[test]
    fn body_of_checks_type() {
        let msg = ReliableMessage::with_body(MessageType::Ping, &42u32, false).unwrap();
        assert_eq!(msg.body_of::<u32>(MessageType::Ping).unwrap(), 42);
        assert!(matches!(
            msg.body_of::<u32>(MessageType::Pong),
            Err(DuelError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn new_sets_timestamp_and_version() {
        let msg = ReliableMessage::new(MessageType::Ping, "", false);
        let now = now_millis();
        assert!(msg.sent_at <= now);
        assert!(msg.sent_at >= now - 60_000);
        assert_eq!(msg.version, PROTOCOL_VERSION);
    }
}
