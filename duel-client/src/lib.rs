//! # duel-client
//!
//! Async peer runtime for Duelink card battles.
//!
//! This is the library that applications embed to battle over a
//! proximity link.
//!
//! ## Features
//!
//! - **Reliable Messaging**: ACK, bounded retry and deduplication over a lossy link
//! - **Connection Lifecycle**: host/guest roles, reconnection detection, collision backoff
//! - **Battle Sessions**: drives the pure duel-core state machine, ready timer included
//! - **Transport Abstraction**: pluggable transport layer (loopback, mock)
//!
//! ## Example
//!
//! ```ignore
//! use duel_client::{loopback_pair, DuelConfig, DuelNode, LinkConditions, MemoryCardStore};
//! use std::sync::Arc;
//!
//! let ((a, a_rx), (b, b_rx)) = loopback_pair("alice", "bob", LinkConditions::default());
//! let host = Arc::new(DuelNode::new(a, Arc::new(MemoryCardStore::new()), &DuelConfig::default()));
//! host.clone().spawn(a_rx);
//! host.start_advertising().await?;
//!
//! host.session().select_card(card).await?;
//! host.session().set_ready().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod connection;
pub mod error;
pub mod node;
pub mod reliability;
pub mod session;
pub mod store;
pub mod transport;

pub use config::{ConfigError, ConnectionConfig, DuelConfig, ReliabilityConfig, SessionConfig};
pub use connection::{ConnectionManager, LinkChange};
pub use error::{Result, SessionError, StoreError};
pub use node::DuelNode;
pub use reliability::ReliableChannel;
pub use session::BattleSession;
pub use store::{CardStore, MemoryCardStore};
pub use transport::{
    loopback_pair, ConnectOutcome, LinkConditions, LoopbackTransport, MockTransport, Transport,
    TransportError, TransportEvent,
};
