//! Error types for the Duelink wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding Duelink frames.
#[derive(Debug, Error)]
pub enum DuelError {
    /// The frame does not follow the `MSG|...` / `ACK|...` layout.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The type field names no known message type.
    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    /// The frame was produced by an incompatible protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// JSON payload encoding failed
    #[error("payload serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON payload decoding failed
    #[error("payload deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The payload was decoded against the wrong message type.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Type the caller asked for.
        expected: String,
        /// Type carried by the envelope.
        actual: String,
    },
}
