//! Demo cards for the simulator.

use anyhow::Result;
use duel_types::{Card, CardId, Rarity};

fn card(id: &str, name: &str, rarity: Rarity, attack: i32, health: i32) -> Card {
    Card {
        id: CardId::new(id),
        name: name.to_string(),
        image_ref: format!("art/{}.png", id),
        rarity,
        base_attack: attack,
        base_health: health,
    }
}

/// All demo cards.
pub fn cards() -> Vec<Card> {
    vec![
        card("ember-drake", "Ember Drake", Rarity::Rare, 50, 100),
        card("tide-caller", "Tide Caller", Rarity::Epic, 40, 120),
        card("moss-golem", "Moss Golem", Rarity::Common, 20, 200),
        card("storm-hawk", "Storm Hawk", Rarity::Uncommon, 65, 70),
        card("void-empress", "Void Empress", Rarity::Legendary, 55, 110),
    ]
}

/// Look up a demo card by id.
pub fn find(id: &str) -> Result<Card> {
    cards()
        .into_iter()
        .find(|c| c.id.as_str() == id)
        .ok_or_else(|| anyhow::anyhow!("unknown card '{}' (see `duel-sim deck`)", id))
}

/// Placeholder artwork for a card.
pub fn artwork(card: &Card) -> String {
    format!("<{} artwork>", card.name)
}
