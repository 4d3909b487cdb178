//! Visible peers and the simultaneous-connect collision policy.
//!
//! When both peers dial each other at once the transport rejects one or
//! both attempts. Retrying symmetrically would collide again, so the delay
//! is derived from the two session identifiers: the lower id retries
//! immediately, the higher one backs off.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use duel_types::{EndpointId, SessionId};

/// Default backoff for the side with the higher session id.
pub const DEFAULT_COLLISION_BACKOFF: Duration = Duration::from_millis(2000);

/// Default number of consecutive collisions tolerated per peer.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// What to do after a rejected or colliding connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionDecision {
    /// Dial again after `delay`.
    Retry {
        /// Time to wait before dialling.
        delay: Duration,
        /// Consecutive failure count, starting at 1.
        attempt: u32,
    },
    /// Stop dialling this peer.
    GiveUp {
        /// Consecutive failures observed.
        attempts: u32,
    },
}

/// Tracks endpoints we can see and their retry state.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    local_session: SessionId,
    backoff: Duration,
    max_attempts: u32,
    visible: BTreeMap<EndpointId, Option<SessionId>>,
    attempts: HashMap<EndpointId, u32>,
    retrying: HashSet<EndpointId>,
}

impl PeerDirectory {
    /// Create a directory with default collision settings.
    pub fn new(local_session: SessionId) -> Self {
        Self::with_policy(
            local_session,
            DEFAULT_COLLISION_BACKOFF,
            DEFAULT_MAX_CONNECT_ATTEMPTS,
        )
    }

    /// Create a directory with explicit collision settings.
    pub fn with_policy(local_session: SessionId, backoff: Duration, max_attempts: u32) -> Self {
        Self {
            local_session,
            backoff,
            max_attempts,
            visible: BTreeMap::new(),
            attempts: HashMap::new(),
            retrying: HashSet::new(),
        }
    }

    /// Our advertised session id.
    pub fn local_session(&self) -> SessionId {
        self.local_session
    }

    /// Record a discovered endpoint. Returns `true` if it was new.
    pub fn endpoint_found(&mut self, endpoint: EndpointId, session: Option<SessionId>) -> bool {
        self.visible.insert(endpoint, session).is_none()
    }

    /// Record a lost endpoint. Returns `true` if it was evicted.
    ///
    /// Endpoints with an outstanding retry stay visible.
    pub fn endpoint_lost(&mut self, endpoint: &EndpointId) -> bool {
        if self.retrying.contains(endpoint) {
            return false;
        }
        self.attempts.remove(endpoint);
        self.visible.remove(endpoint).is_some()
    }

    /// Whether `endpoint` is currently visible.
    pub fn is_visible(&self, endpoint: &EndpointId) -> bool {
        self.visible.contains_key(endpoint)
    }

    /// Visible endpoints in a stable order.
    pub fn visible(&self) -> Vec<EndpointId> {
        self.visible.keys().cloned().collect()
    }

    /// Whether a retry is outstanding for `endpoint`.
    pub fn is_retrying(&self, endpoint: &EndpointId) -> bool {
        self.retrying.contains(endpoint)
    }

    /// Decide how to react to a rejected or colliding connect.
    pub fn on_rejected(&mut self, endpoint: &EndpointId) -> CollisionDecision {
        let attempt = {
            let count = self.attempts.entry(endpoint.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt > self.max_attempts {
            self.retrying.remove(endpoint);
            self.attempts.remove(endpoint);
            return CollisionDecision::GiveUp { attempts: attempt };
        }

        let peer_session = self.visible.get(endpoint).copied().flatten();
        let delay = match peer_session {
            Some(peer) if self.local_session < peer => Duration::ZERO,
            _ => self.backoff,
        };
        self.retrying.insert(endpoint.clone());
        CollisionDecision::Retry { delay, attempt }
    }

    /// The retry timer for `endpoint` fired.
    pub fn retry_fired(&mut self, endpoint: &EndpointId) {
        self.retrying.remove(endpoint);
    }

    /// A connection to `endpoint` succeeded; reset its failure count.
    pub fn on_connected(&mut self, endpoint: &EndpointId) {
        self.retrying.remove(endpoint);
        self.attempts.remove(endpoint);
    }

    /// Forget all peers and retry state.
    pub fn clear(&mut self) {
        self.visible.clear();
        self.attempts.clear();
        self.retrying.clear();
    }
}
