//! Protocol messages for Duelink.
//!
//! These are the typed payloads carried inside a [`ReliableMessage`]. The
//! envelope's type field selects the variant; the payload is JSON.

use serde::{Deserialize, Serialize};

use crate::{
    BattleResult, BattleStorySegment, Card, CardId, CardPreview, CardStats, DuelError,
    ReliableMessage, SessionId,
};

// Re-export MessageType from envelope for convenience
pub use crate::envelope::MessageType;

/// All protocol messages that carry a payload.
///
/// Acknowledgements are not listed here; they are handled at the frame
/// level by the reliability layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the peer for its slot summary
    StateSyncRequest(StateSyncRequest),
    /// Slot summary
    StateSyncResponse(StateSyncResponse),
    /// Card preview or full card
    CardSelected(CardSelected),
    /// Card artwork
    ImageTransfer(ImageTransfer),
    /// Ask the peer to resend its artwork
    ImageRequest(ImageRequest),
    /// The sender clicked ready
    PlayerReady(PlayerReady),
    /// The sender holds all of the receiver's card data
    ReadyAck(ReadyAck),
    /// The sender gave up waiting
    ReadyTimeout(ReadyTimeout),
    /// Host announces the revealed pairing
    RevealStart(RevealStart),
    /// Host starts streaming the story
    BattleStart(BattleStart),
    /// One indexed story segment
    StorySegment(StorySegment),
    /// Final verdict (host perspective)
    BattleResult(BattleVerdict),
    /// Keepalive probe
    Ping(Ping),
    /// Keepalive answer
    Pong(Ping),
}

impl Message {
    /// The envelope type for this message.
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::StateSyncRequest(_) => MessageType::StateSyncRequest,
            Message::StateSyncResponse(_) => MessageType::StateSyncResponse,
            Message::CardSelected(_) => MessageType::CardSelected,
            Message::ImageTransfer(_) => MessageType::ImageTransfer,
            Message::ImageRequest(_) => MessageType::ImageRequest,
            Message::PlayerReady(_) => MessageType::PlayerReady,
            Message::ReadyAck(_) => MessageType::ReadyAck,
            Message::ReadyTimeout(_) => MessageType::ReadyTimeout,
            Message::RevealStart(_) => MessageType::RevealStart,
            Message::BattleStart(_) => MessageType::BattleStart,
            Message::StorySegment(_) => MessageType::StorySegment,
            Message::BattleResult(_) => MessageType::BattleResult,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
        }
    }

    /// Whether this message is delivered with acknowledgement and retry.
    ///
    /// Keepalives, timeout notices and image requests are fire-and-forget.
    pub fn requires_ack(&self) -> bool {
        !matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::ReadyTimeout(_) | Message::ImageRequest(_)
        )
    }

    /// Wrap this message in a fresh envelope.
    pub fn to_reliable(&self) -> Result<ReliableMessage, DuelError> {
        let msg_type = self.msg_type();
        let requires_ack = self.requires_ack();
        match self {
            Message::StateSyncRequest(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::StateSyncResponse(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::CardSelected(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::ImageTransfer(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::ImageRequest(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::PlayerReady(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::ReadyAck(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::ReadyTimeout(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::RevealStart(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::BattleStart(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::StorySegment(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::BattleResult(m) => ReliableMessage::with_body(msg_type, m, requires_ack),
            Message::Ping(m) | Message::Pong(m) => {
                ReliableMessage::with_body(msg_type, m, requires_ack)
            }
        }
    }

    /// Decode the typed message carried by an envelope.
    pub fn from_reliable(msg: &ReliableMessage) -> Result<Self, DuelError> {
        Ok(match msg.msg_type {
            MessageType::StateSyncRequest => Message::StateSyncRequest(msg.body()?),
            MessageType::StateSyncResponse => Message::StateSyncResponse(msg.body()?),
            MessageType::CardSelected => Message::CardSelected(msg.body()?),
            MessageType::ImageTransfer => Message::ImageTransfer(msg.body()?),
            MessageType::ImageRequest => Message::ImageRequest(msg.body()?),
            MessageType::PlayerReady => Message::PlayerReady(msg.body()?),
            MessageType::ReadyAck => Message::ReadyAck(msg.body()?),
            MessageType::ReadyTimeout => Message::ReadyTimeout(msg.body()?),
            MessageType::RevealStart => Message::RevealStart(msg.body()?),
            MessageType::BattleStart => Message::BattleStart(msg.body()?),
            MessageType::StorySegment => Message::StorySegment(msg.body()?),
            MessageType::BattleResult => Message::BattleResult(msg.body()?),
            MessageType::Ping => Message::Ping(msg.body()?),
            MessageType::Pong => Message::Pong(msg.body()?),
            MessageType::Ack => {
                return Err(DuelError::UnexpectedType {
                    expected: "payload message".into(),
                    actual: MessageType::Ack.to_string(),
                })
            }
        })
    }
}

/// Ask the peer for a summary of its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSyncRequest {
    /// Requester's session
    pub session_id: SessionId,
}

/// The responder's view of its own slot and of the requester's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSyncResponse {
    /// Responder's session
    pub session_id: SessionId,
    /// Responder has selected a card
    pub has_selected_card: bool,
    /// Preview of the responder's card, if selected
    pub card: Option<CardPreview>,
    /// Responder has clicked ready
    pub is_ready: bool,
    /// Responder holds the requester's preview, stats and image
    pub holds_your_data: bool,
}

/// A card selection.
///
/// `stats` is `None` for the low-information preview sent at selection time
/// and `Some` for the full card sent when the player clicks ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSelected {
    /// Card identity
    pub card: CardPreview,
    /// Base stats, withheld in previews
    pub stats: Option<CardStats>,
}

impl CardSelected {
    /// Preview of `card` (stats withheld).
    pub fn preview(card: &Card) -> Self {
        Self {
            card: card.preview(),
            stats: None,
        }
    }

    /// Full description of `card`.
    pub fn full(card: &Card) -> Self {
        Self {
            card: card.preview(),
            stats: Some(card.stats()),
        }
    }

    /// Whether stats are withheld.
    pub fn is_preview(&self) -> bool {
        self.stats.is_none()
    }

    /// The full card, if stats are present.
    pub fn full_card(&self) -> Option<Card> {
        self.stats
            .map(|stats| Card::from_parts(self.card.clone(), stats))
    }
}

/// Card artwork.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTransfer {
    /// Card the artwork belongs to
    pub card_id: CardId,
    /// Artwork reference
    pub image_ref: String,
    /// Encoded artwork (opaque to the protocol)
    pub data: String,
}

impl std::fmt::Debug for ImageTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageTransfer")
            .field("card_id", &self.card_id)
            .field("image_ref", &self.image_ref)
            .field("data", &format!("[{} bytes]", self.data.len()))
            .finish()
    }
}

/// Ask the peer to resend artwork for a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// The peer's card
    pub card_id: CardId,
}

/// The sender clicked ready with the given card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReady {
    /// Sender's card
    pub card_id: CardId,
}

/// The sender holds preview, stats and image of the receiver's card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyAck {
    /// Receiver's card, as the sender holds it
    pub card_id: CardId,
}

/// The sender gave up waiting for the two-phase commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyTimeout {
    /// How long the sender waited
    pub waited_secs: u64,
}

/// Host announces the pairing it is about to battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealStart {
    /// Host's card
    pub host_card_id: CardId,
    /// Guest's card
    pub guest_card_id: CardId,
}

/// Host starts streaming the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleStart {
    /// Number of story segments that will follow
    pub total_segments: u32,
}

/// One story segment with its position in the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySegment {
    /// Zero-based position
    pub index: u32,
    /// Number of segments in the story
    pub total: u32,
    /// The segment, host perspective
    pub segment: BattleStorySegment,
}

/// Final verdict, host perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleVerdict {
    /// The result
    pub result: BattleResult,
    /// Number of story segments in the battle
    pub total_segments: u32,
}

/// Keepalive payload; a PONG echoes the PING's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender's clock when the probe was sent (milliseconds)
    pub sent_at: u64,
}
