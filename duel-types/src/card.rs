//! Card and battle-story data shared by both peers.

use serde::{Deserialize, Serialize};

use crate::CardId;

/// Card rarity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    /// Most common tier
    Common,
    /// Slightly rarer
    Uncommon,
    /// Rare
    Rare,
    /// Epic
    Epic,
    /// Rarest tier
    Legendary,
}

/// A card as stored in the external collection.
///
/// Zero is a legitimate value for either base stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Collection identifier
    pub id: CardId,
    /// Display name
    pub name: String,
    /// Reference to the card artwork
    pub image_ref: String,
    /// Rarity tier
    pub rarity: Rarity,
    /// Attack before rarity adjustment
    pub base_attack: i32,
    /// Health before rarity adjustment
    pub base_health: i32,
}

impl Card {
    /// The low-information view of this card (stats withheld).
    pub fn preview(&self) -> CardPreview {
        CardPreview {
            id: self.id.clone(),
            name: self.name.clone(),
            image_ref: self.image_ref.clone(),
            rarity: self.rarity,
        }
    }

    /// The base stats of this card.
    pub fn stats(&self) -> CardStats {
        CardStats {
            base_attack: self.base_attack,
            base_health: self.base_health,
        }
    }

    /// Reassemble a card from its preview and stats.
    pub fn from_parts(preview: CardPreview, stats: CardStats) -> Self {
        Self {
            id: preview.id,
            name: preview.name,
            image_ref: preview.image_ref,
            rarity: preview.rarity,
            base_attack: stats.base_attack,
            base_health: stats.base_health,
        }
    }
}

/// Identity of a card without its stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPreview {
    /// Collection identifier
    pub id: CardId,
    /// Display name
    pub name: String,
    /// Reference to the card artwork
    pub image_ref: String,
    /// Rarity tier
    pub rarity: Rarity,
}

/// Base stats of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStats {
    /// Attack before rarity adjustment
    pub base_attack: i32,
    /// Health before rarity adjustment
    pub base_health: i32,
}

/// One narrated step of a battle.
///
/// On the wire `is_local_action` is from the host's perspective; the guest
/// flips it with [`BattleStorySegment::mirrored`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleStorySegment {
    /// Narration text
    pub text: String,
    /// Whether the acting side is the local player
    pub is_local_action: bool,
    /// Damage dealt in this step, if any
    pub damage_dealt: Option<i32>,
}

impl BattleStorySegment {
    /// The same segment seen from the other peer.
    pub fn mirrored(&self) -> Self {
        Self {
            text: self.text.clone(),
            is_local_action: !self.is_local_action,
            damage_dealt: self.damage_dealt,
        }
    }
}

/// Final verdict of a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleResult {
    /// Neither side won
    pub is_draw: bool,
    /// `Some(true)` if the local side won, `None` on a draw
    pub winner_is_local: Option<bool>,
    /// Remaining health of the local card (may be negative)
    pub local_final_health: i32,
    /// Remaining health of the opponent card (may be negative)
    pub opponent_final_health: i32,
    /// Full narration, one segment per line
    pub story_text: String,
    /// The losing card, which changes hands
    pub card_transferred: Option<CardId>,
}

impl BattleResult {
    /// The same verdict seen from the other peer.
    pub fn mirrored(&self) -> Self {
        Self {
            is_draw: self.is_draw,
            winner_is_local: self.winner_is_local.map(|local| !local),
            local_final_health: self.opponent_final_health,
            opponent_final_health: self.local_final_health,
            story_text: self.story_text.clone(),
            card_transferred: self.card_transferred.clone(),
        }
    }

    /// Whether the local side lost.
    pub fn local_lost(&self) -> bool {
        self.winner_is_local == Some(false)
    }
}
