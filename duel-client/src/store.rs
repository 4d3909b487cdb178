//! Card collection collaborator.
//!
//! The session never owns the player's collection. It asks a
//! [`CardStore`] for artwork when sending IMAGE_TRANSFER and tells it which
//! cards changed hands after a battle. Both updates must be idempotent.

use async_trait::async_trait;
use dashmap::DashMap;
use duel_types::{Card, CardId};

use crate::error::StoreError;

/// Persistent card collection, supplied by the application.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Add a card won from the opponent.
    async fn transfer_won_card(&self, card: Card) -> Result<(), StoreError>;

    /// Remove a card lost in battle. Removing an absent card is not an error.
    async fn delete_lost_card(&self, card_id: &CardId) -> Result<(), StoreError>;

    /// Encoded artwork for a card, if any.
    async fn load_image(&self, card_id: &CardId) -> Result<Option<String>, StoreError>;
}

/// In-memory card collection.
#[derive(Debug, Default)]
pub struct MemoryCardStore {
    cards: DashMap<CardId, Card>,
    images: DashMap<CardId, String>,
}

impl MemoryCardStore {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a card and its artwork.
    pub fn insert(&self, card: Card, image: impl Into<String>) {
        self.images.insert(card.id.clone(), image.into());
        self.cards.insert(card.id.clone(), card);
    }

    /// Look up a card.
    pub fn get(&self, card_id: &CardId) -> Option<Card> {
        self.cards.get(card_id).map(|c| c.clone())
    }

    /// Whether the collection holds `card_id`.
    pub fn contains(&self, card_id: &CardId) -> bool {
        self.cards.contains_key(card_id)
    }

    /// Number of cards held.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// All cards, sorted by id.
    pub fn cards(&self) -> Vec<Card> {
        let mut cards: Vec<Card> = self.cards.iter().map(|c| c.value().clone()).collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    async fn transfer_won_card(&self, card: Card) -> Result<(), StoreError> {
        tracing::info!("Collection: won {} ({})", card.name, card.id);
        self.cards.insert(card.id.clone(), card);
        Ok(())
    }

    async fn delete_lost_card(&self, card_id: &CardId) -> Result<(), StoreError> {
        if self.cards.remove(card_id).is_some() {
            tracing::info!("Collection: lost {}", card_id);
        }
        self.images.remove(card_id);
        Ok(())
    }

    async fn load_image(&self, card_id: &CardId) -> Result<Option<String>, StoreError> {
        Ok(self.images.get(card_id).map(|i| i.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_types::Rarity;

    fn card(id: &str) -> Card {
        Card {
            id: CardId::new(id),
            name: id.to_uppercase(),
            image_ref: format!("art/{}.png", id),
            rarity: Rarity::Epic,
            base_attack: 10,
            base_health: 20,
        }
    }

    #[tokio::test]
    async fn transfer_is_idempotent() {
        let store = MemoryCardStore::new();
        store.transfer_won_card(card("a")).await.unwrap();
        store.transfer_won_card(card("a")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&CardId::new("a")), Some(card("a")));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryCardStore::new();
        store.insert(card("a"), "png");
        store.delete_lost_card(&CardId::new("a")).await.unwrap();
        store.delete_lost_card(&CardId::new("a")).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.load_image(&CardId::new("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn images_are_served() {
        let store = MemoryCardStore::new();
        store.insert(card("a"), "base64-art");
        assert_eq!(
            store.load_image(&CardId::new("a")).await.unwrap(),
            Some("base64-art".to_string())
        );
        assert_eq!(store.load_image(&CardId::new("b")).await.unwrap(), None);
    }

    #[test]
    fn cards_are_sorted() {
        let store = MemoryCardStore::new();
        store.insert(card("b"), "");
        store.insert(card("a"), "");
        let ids: Vec<_> = store.cards().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![CardId::new("a"), CardId::new("b")]);
    }
}
