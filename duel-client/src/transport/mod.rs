//! Transport abstraction for Duelink.
//!
//! The protocol assumes nothing about the underlying link beyond this:
//! raw bytes can be sent to a peer and arrive (or not) in any order, and
//! discrete lifecycle events are reported.
//!
//! # Design
//!
//! Outbound operations go through the async [`Transport`] trait. Inbound
//! traffic and lifecycle signals arrive as [`TransportEvent`]s on a channel
//! owned by whoever drives the node.
//!
//! # Example
//!
//! ```ignore
//! let ((a, a_events), (b, b_events)) = loopback_pair("alice", "bob", LinkConditions::default());
//! a.start_advertising(session_id).await?;
//! b.start_discovery().await?;
//! ```

mod loopback;
mod mock;

pub use loopback::{loopback_pair, LinkConditions, LoopbackTransport};
pub use mock::MockTransport;

use async_trait::async_trait;
use duel_types::{EndpointId, SessionId};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No link to the given endpoint.
    #[error("not connected to {0}")]
    NotConnected(EndpointId),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection request could not be issued.
    #[error("connection request failed: {0}")]
    ConnectionFailed(String),

    /// Transport has shut down.
    #[error("transport closed")]
    Closed,
}

/// How a connection attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Link established.
    Connected,
    /// Peer refused the connection.
    Rejected(String),
    /// Both peers dialled at once and the attempt was dropped.
    Collision,
}

/// Inbound signal from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt (ours or the peer's) finished.
    ConnectResult {
        /// The other side.
        endpoint: EndpointId,
        /// Result of the attempt.
        outcome: ConnectOutcome,
    },
    /// The link to a peer dropped.
    Disconnected {
        /// The peer.
        endpoint: EndpointId,
    },
    /// A peer became visible.
    EndpointFound {
        /// The peer.
        endpoint: EndpointId,
        /// Session id the peer advertises, if any.
        session_id: Option<SessionId>,
    },
    /// A peer is no longer visible.
    EndpointLost {
        /// The peer.
        endpoint: EndpointId,
    },
    /// Raw bytes from a peer.
    Received {
        /// Sender.
        endpoint: EndpointId,
        /// Payload, no ordering or delivery guarantee.
        bytes: Vec<u8>,
    },
}

/// Outbound side of a peer-to-peer transport.
///
/// Implementations handle the underlying link (radio, sockets, in-memory).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Our own endpoint id.
    fn local_endpoint(&self) -> EndpointId;

    /// Send bytes to a connected peer. Delivery is not guaranteed.
    async fn send_raw(&self, endpoint: &EndpointId, data: &[u8]) -> Result<(), TransportError>;

    /// Dial a visible peer; the result arrives as `ConnectResult`.
    async fn request_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError>;

    /// Make ourselves visible, advertising `session`.
    async fn start_advertising(&self, session: SessionId) -> Result<(), TransportError>;

    /// Look for advertising peers.
    async fn start_discovery(&self) -> Result<(), TransportError>;

    /// Drop the link to a peer.
    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError>;
}
