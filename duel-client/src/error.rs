//! Error types for duel-client.

use duel_core::CommandError;
use duel_types::{CardId, DuelError};

use crate::transport::TransportError;

/// Errors surfaced by a battle session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A local command was not allowed in the current state.
    #[error("command rejected: {0}")]
    Command(#[from] CommandError),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] DuelError),

    /// The transport refused a send.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The card collection rejected an update.
    #[error("card store error: {0}")]
    Store(#[from] StoreError),

    /// No peer is connected.
    #[error("no peer connected")]
    NoPeer,
}

/// Card collection errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Card is not in the collection.
    #[error("card not found: {card_id}")]
    NotFound {
        /// The card that was not found.
        card_id: CardId,
    },

    /// Backend failure.
    #[error("card store backend error: {0}")]
    Backend(String),
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_convert() {
        let err: SessionError = CommandError::NoCardSelected.into();
        assert_eq!(
            err.to_string(),
            "command rejected: select a card before clicking ready"
        );
    }

    #[test]
    fn store_error_names_card() {
        let err = StoreError::NotFound {
            card_id: CardId::new("c-1"),
        };
        assert_eq!(err.to_string(), "card not found: c-1");
    }
}
