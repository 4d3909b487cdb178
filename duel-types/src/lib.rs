//! # duel-types
//!
//! Wire format types for the Duelink peer-to-peer card battle protocol.
//!
//! This crate provides the foundational types used across all Duelink crates:
//! - [`MessageId`], [`EndpointId`], [`SessionId`], [`CardId`] - Identity types
//! - [`ReliableMessage`], [`Frame`] - Envelope and its `MSG|`/`ACK|` text encoding
//! - [`Message`] - Typed protocol payloads (CARD_SELECTED, PLAYER_READY, etc.)
//! - [`Card`], [`BattleStorySegment`], [`BattleResult`] - Game data on the wire
//! - [`DuelError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod card;
mod envelope;
mod error;
mod ids;
mod messages;

pub use card::{BattleResult, BattleStorySegment, Card, CardPreview, CardStats, Rarity};
pub use envelope::{now_millis, Frame, MessageType, ReliableMessage, PROTOCOL_VERSION};
pub use error::DuelError;
pub use ids::{CardId, EndpointId, MessageId, SessionId};
pub use messages::{
    BattleStart, BattleVerdict, CardSelected, ImageRequest, ImageTransfer, Message, Ping,
    PlayerReady, ReadyAck, ReadyTimeout, RevealStart, StateSyncRequest, StateSyncResponse,
    StorySegment,
};
