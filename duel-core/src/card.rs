//! Battle-ready cards and the rarity adjustment table.
//!
//! Effective stats are computed once, when a card is selected, and carried
//! unchanged through the battle.

use duel_types::{Card, Rarity};
use serde::{Deserialize, Serialize};

/// Multiplier and flat bonus applied to a base stat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RarityAdjustment {
    /// Scales the base stat.
    pub multiplier: f64,
    /// Added after scaling.
    pub bonus: i32,
}

/// Fixed adjustment for each rarity tier.
pub fn rarity_adjustment(rarity: Rarity) -> RarityAdjustment {
    let (multiplier, bonus) = match rarity {
        Rarity::Common => (1.0, 0),
        Rarity::Uncommon => (1.1, 2),
        Rarity::Rare => (1.25, 5),
        Rarity::Epic => (1.4, 10),
        Rarity::Legendary => (1.6, 20),
    };
    RarityAdjustment { multiplier, bonus }
}

/// Apply the rarity adjustment to a single base stat.
///
/// Stats arrive from the peer, so the result saturates at the `i32` bounds.
pub fn effective_stat(base: i32, rarity: Rarity) -> i32 {
    let adj = rarity_adjustment(rarity);
    // Float to int casts saturate; only the bonus can overflow.
    ((f64::from(base) * adj.multiplier).round() as i32).saturating_add(adj.bonus)
}

/// A card with stats fixed for the duration of a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleCard {
    /// The card as stored in the collection.
    pub base: Card,
    /// Attack after rarity adjustment.
    pub effective_attack: i32,
    /// Health after rarity adjustment.
    pub effective_health: i32,
    /// Health at the current point of the battle.
    pub current_health: i32,
}

impl BattleCard {
    /// Compute effective stats for `card`.
    pub fn from_card(card: Card) -> Self {
        let effective_attack = effective_stat(card.base_attack, card.rarity);
        let effective_health = effective_stat(card.base_health, card.rarity);
        Self {
            base: card,
            effective_attack,
            effective_health,
            current_health: effective_health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_types::CardId;

    fn card(rarity: Rarity, attack: i32, health: i32) -> Card {
        Card {
            id: CardId::new("c"),
            name: "Test".into(),
            image_ref: "art/test.png".into(),
            rarity,
            base_attack: attack,
            base_health: health,
        }
    }

    #[test]
    fn common_cards_are_unchanged() {
        let bc = BattleCard::from_card(card(Rarity::Common, 50, 100));
        assert_eq!(bc.effective_attack, 50);
        assert_eq!(bc.effective_health, 100);
        assert_eq!(bc.current_health, 100);
    }

    #[test]
    fn legendary_cards_get_multiplier_and_bonus() {
        let bc = BattleCard::from_card(card(Rarity::Legendary, 50, 100));
        assert_eq!(bc.effective_attack, 100); // 50 * 1.6 + 20
        assert_eq!(bc.effective_health, 180); // 100 * 1.6 + 20
    }

    #[test]
    fn zero_stat_is_a_real_stat() {
        let bc = BattleCard::from_card(card(Rarity::Common, 0, 0));
        assert_eq!(bc.effective_attack, 0);
        assert_eq!(bc.effective_health, 0);
    }

    #[test]
    fn extreme_stats_saturate() {
        let bc = BattleCard::from_card(card(Rarity::Legendary, i32::MAX, i32::MAX));
        assert_eq!(bc.effective_attack, i32::MAX);
        assert_eq!(bc.effective_health, i32::MAX);

        let bc = BattleCard::from_card(card(Rarity::Epic, i32::MIN, i32::MIN));
        assert_eq!(bc.effective_attack, i32::MIN + 10);
        assert_eq!(bc.effective_health, i32::MIN + 10);
    }

    #[test]
    fn adjustments_increase_with_rarity() {
        let tiers = [
            Rarity::Common,
            Rarity::Uncommon,
            Rarity::Rare,
            Rarity::Epic,
            Rarity::Legendary,
        ];
        let stats: Vec<i32> = tiers.iter().map(|r| effective_stat(40, *r)).collect();
        assert!(stats.windows(2).all(|w| w[0] < w[1]), "{:?}", stats);
    }
}
