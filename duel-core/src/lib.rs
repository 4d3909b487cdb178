//! # duel-core
//!
//! Pure logic for Duelink (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for a two-peer
//! card battle without any network or timer I/O:
//! - [`card`] - rarity table and battle-ready cards
//! - [`outcome`] - seeded, deterministic battle calculation
//! - [`lifecycle`] - connection lifecycle tracking and reconnection detection
//! - [`peers`] - visible peers and the collision retry policy
//! - [`story`] - index-based reassembly of streamed story segments
//! - [`session`] - the battle session state machine and two-phase ready commit
//!
//! The actual I/O (transport, retries, timers) is performed by
//! `duel-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod card;
pub mod lifecycle;
pub mod outcome;
pub mod peers;
pub mod session;
pub mod story;

pub use card::{effective_stat, rarity_adjustment, BattleCard, RarityAdjustment};
pub use lifecycle::{ConnectionEvent, ConnectionLifecycle, LifecycleTracker, ReconnectionCallback};
pub use outcome::{compute_battle, BattleOutcome, MAX_ROUNDS, MIN_ROUNDS};
pub use peers::{
    CollisionDecision, PeerDirectory, DEFAULT_COLLISION_BACKOFF, DEFAULT_MAX_CONNECT_ATTEMPTS,
};
pub use session::{
    BattlePhase, BattleSessionState, CommandError, PlayerSlot, SessionAction, SessionEvent,
    Transition,
};
pub use story::StoryAssembler;
