//! Connection lifecycle tracking.
//!
//! The tracker consumes raw transport signals (discovery, connect results,
//! disconnects) and maintains a single current [`ConnectionLifecycle`], a
//! monotonically increasing connection counter, and append-only event and
//! history logs. It performs no I/O; `duel-client` feeds it.

use std::fmt;

use duel_types::EndpointId;

/// Current connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionLifecycle {
    /// Nothing started yet.
    Idle,
    /// Looking for advertising peers.
    Discovering,
    /// Advertising ourselves to peers.
    Advertising,
    /// Outbound connection attempt in progress.
    Connecting {
        /// Endpoint being dialled.
        target: EndpointId,
    },
    /// Link established.
    Connected {
        /// Connected peer.
        endpoint_id: EndpointId,
        /// Strictly increasing across the tracker's lifetime, starting at 1.
        connection_number: u64,
        /// A different endpoint was connected before this one.
        is_reconnection: bool,
        /// Endpoint of the previous connection, if any.
        previous_endpoint_id: Option<EndpointId>,
    },
    /// Link lost.
    Disconnected,
    /// Unrecoverable connection failure.
    Error {
        /// User-visible reason.
        reason: String,
    },
}

impl ConnectionLifecycle {
    /// Check if a link is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Entry in the append-only connection event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Discovery started.
    DiscoveryStarted,
    /// Advertising started.
    AdvertisingStarted,
    /// A connection succeeded.
    ConnectionSuccess {
        /// Connected peer.
        endpoint_id: EndpointId,
        /// Whether this replaced a different previous endpoint.
        is_reconnection: bool,
    },
    /// A connection attempt failed.
    ConnectionFailed {
        /// Peer we tried to reach.
        endpoint_id: EndpointId,
        /// Failure reason.
        reason: String,
    },
    /// The link to a peer dropped.
    Disconnected {
        /// Peer that went away.
        endpoint_id: EndpointId,
    },
    /// A connection replaced a previously connected, different endpoint.
    ReconnectionDetected {
        /// Previously connected endpoint.
        old_endpoint: EndpointId,
        /// Newly connected endpoint.
        new_endpoint: EndpointId,
    },
    /// A simultaneous connect was rejected and will be retried.
    CollisionDetected {
        /// Peer involved.
        endpoint_id: EndpointId,
        /// Consecutive collision count for this peer.
        attempt: u32,
    },
}

/// Callback invoked with `(old, new)` when a reconnection is detected.
pub type ReconnectionCallback = Box<dyn FnMut(&EndpointId, &EndpointId) + Send>;

/// Tracks connection lifecycle state.
pub struct LifecycleTracker {
    state: ConnectionLifecycle,
    connection_number: u64,
    previous_connected_endpoint: Option<EndpointId>,
    is_host: bool,
    events: Vec<ConnectionEvent>,
    history: Vec<ConnectionLifecycle>,
    on_reconnection: Option<ReconnectionCallback>,
}

impl LifecycleTracker {
    /// Create a tracker in the Idle state.
    pub fn new() -> Self {
        Self {
            state: ConnectionLifecycle::Idle,
            connection_number: 0,
            previous_connected_endpoint: None,
            is_host: false,
            events: Vec::new(),
            history: Vec::new(),
            on_reconnection: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectionLifecycle {
        &self.state
    }

    /// Number of successful connections so far.
    pub fn connection_number(&self) -> u64 {
        self.connection_number
    }

    /// Endpoint of the most recent successful connection.
    pub fn previous_endpoint(&self) -> Option<&EndpointId> {
        self.previous_connected_endpoint.as_ref()
    }

    /// Whether the current link was accepted (not initiated) by us.
    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Event log, oldest first.
    pub fn events(&self) -> &[ConnectionEvent] {
        &self.events
    }

    /// Snapshot of every Connected state, oldest first.
    pub fn history(&self) -> &[ConnectionLifecycle] {
        &self.history
    }

    /// Register the reconnection callback, replacing any previous one.
    pub fn on_reconnection(&mut self, callback: ReconnectionCallback) {
        self.on_reconnection = Some(callback);
    }

    /// Discovery started.
    pub fn discovery_started(&mut self) {
        if !self.state.is_connected() {
            self.state = ConnectionLifecycle::Discovering;
        }
        self.events.push(ConnectionEvent::DiscoveryStarted);
    }

    /// Advertising started.
    pub fn advertising_started(&mut self) {
        if !self.state.is_connected() && !matches!(self.state, ConnectionLifecycle::Discovering) {
            self.state = ConnectionLifecycle::Advertising;
        }
        self.events.push(ConnectionEvent::AdvertisingStarted);
    }

    /// We are dialling `target`.
    pub fn connecting(&mut self, target: EndpointId) {
        self.state = ConnectionLifecycle::Connecting { target };
    }

    /// A connect attempt with `endpoint_id` finished.
    ///
    /// The side that was not dialling `endpoint_id` when the link came up
    /// accepted it and becomes the host.
    pub fn connection_result(
        &mut self,
        endpoint_id: EndpointId,
        result: Result<(), String>,
    ) -> &ConnectionLifecycle {
        match result {
            Ok(()) => {
                let initiated = matches!(
                    &self.state,
                    ConnectionLifecycle::Connecting { target } if *target == endpoint_id
                );
                self.is_host = !initiated;
                self.connection_number += 1;

                let previous = self.previous_connected_endpoint.clone();
                let is_reconnection = previous.as_ref().is_some_and(|p| *p != endpoint_id);

                self.events.push(ConnectionEvent::ConnectionSuccess {
                    endpoint_id: endpoint_id.clone(),
                    is_reconnection,
                });
                if is_reconnection {
                    if let Some(old) = &previous {
                        self.events.push(ConnectionEvent::ReconnectionDetected {
                            old_endpoint: old.clone(),
                            new_endpoint: endpoint_id.clone(),
                        });
                        if let Some(cb) = self.on_reconnection.as_mut() {
                            cb(old, &endpoint_id);
                        }
                    }
                }

                self.previous_connected_endpoint = Some(endpoint_id.clone());
                self.state = ConnectionLifecycle::Connected {
                    endpoint_id,
                    connection_number: self.connection_number,
                    is_reconnection,
                    previous_endpoint_id: previous,
                };
                self.history.push(self.state.clone());
            }
            Err(reason) => {
                self.events.push(ConnectionEvent::ConnectionFailed {
                    endpoint_id,
                    reason,
                });
                if !self.state.is_connected() {
                    self.state = ConnectionLifecycle::Disconnected;
                }
            }
        }
        &self.state
    }

    /// A simultaneous connect with `endpoint_id` was rejected.
    pub fn collision(&mut self, endpoint_id: EndpointId, attempt: u32) {
        self.events.push(ConnectionEvent::CollisionDetected {
            endpoint_id,
            attempt,
        });
    }

    /// The link to `endpoint_id` dropped.
    ///
    /// Returns `false` if the endpoint was not the connected one; the event
    /// is still logged.
    pub fn disconnected(&mut self, endpoint_id: EndpointId) -> bool {
        let current = match &self.state {
            ConnectionLifecycle::Connected { endpoint_id: e, .. } => *e == endpoint_id,
            ConnectionLifecycle::Connecting { target } => *target == endpoint_id,
            _ => false,
        };
        self.events.push(ConnectionEvent::Disconnected { endpoint_id });
        if current {
            self.state = ConnectionLifecycle::Disconnected;
        }
        current
    }

    /// Surface an unrecoverable failure.
    pub fn error(&mut self, reason: impl Into<String>) {
        self.state = ConnectionLifecycle::Error {
            reason: reason.into(),
        };
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("state", &self.state)
            .field("connection_number", &self.connection_number)
            .field("previous_connected_endpoint", &self.previous_connected_endpoint)
            .field("is_host", &self.is_host)
            .field("events", &self.events.len())
            .field("history", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ep(id: &str) -> EndpointId {
        EndpointId::new(id)
    }

    #[test]
    fn new_tracker_is_idle() {
        let tracker = LifecycleTracker::new();
        assert_eq!(tracker.state(), &ConnectionLifecycle::Idle);
        assert_eq!(tracker.connection_number(), 0);
        assert!(tracker.events().is_empty());
    }

    #[test]
    fn first_connection_is_number_one() {
        let mut tracker = LifecycleTracker::new();
        tracker.discovery_started();
        tracker.connecting(ep("a"));
        let state = tracker.connection_result(ep("a"), Ok(())).clone();
        assert_eq!(
            state,
            ConnectionLifecycle::Connected {
                endpoint_id: ep("a"),
                connection_number: 1,
                is_reconnection: false,
                previous_endpoint_id: None,
            }
        );
        assert!(!tracker.is_host());
    }

    #[test]
    fn accepting_side_is_host() {
        let mut tracker = LifecycleTracker::new();
        tracker.advertising_started();
        tracker.connection_result(ep("a"), Ok(()));
        assert!(tracker.is_host());
    }

    #[test]
    fn connection_numbers_strictly_increase() {
        let mut tracker = LifecycleTracker::new();
        let mut seen = Vec::new();
        for i in 0..5 {
            let id = ep(&format!("peer-{}", i % 2));
            tracker.connection_result(id.clone(), Ok(()));
            seen.push(tracker.connection_number());
            tracker.disconnected(id);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn same_endpoint_again_is_not_a_reconnection() {
        let mut tracker = LifecycleTracker::new();
        tracker.connection_result(ep("a"), Ok(()));
        tracker.disconnected(ep("a"));
        tracker.connection_result(ep("a"), Ok(()));
        assert!(matches!(
            tracker.state(),
            ConnectionLifecycle::Connected {
                is_reconnection: false,
                connection_number: 2,
                ..
            }
        ));
        assert!(!tracker
            .events()
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ReconnectionDetected { .. })));
    }

    #[test]
    fn reconnection_event_follows_success_and_fires_callback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();

        let mut tracker = LifecycleTracker::new();
        tracker.on_reconnection(Box::new(move |old, new| {
            sink.lock().unwrap().push((old.clone(), new.clone()));
        }));
        tracker.connection_result(ep("a"), Ok(()));
        tracker.disconnected(ep("a"));
        tracker.connection_result(ep("b"), Ok(()));

        let events = tracker.events();
        let success = events
            .iter()
            .position(|e| {
                matches!(e, ConnectionEvent::ConnectionSuccess { endpoint_id, .. } if *endpoint_id == ep("b"))
            })
            .unwrap();
        let reconnect = events
            .iter()
            .position(|e| matches!(e, ConnectionEvent::ReconnectionDetected { .. }))
            .unwrap();
        assert!(success < reconnect);
        assert_eq!(calls.lock().unwrap().as_slice(), &[(ep("a"), ep("b"))]);

        match tracker.state() {
            ConnectionLifecycle::Connected {
                is_reconnection,
                previous_endpoint_id,
                ..
            } => {
                assert!(is_reconnection);
                assert_eq!(previous_endpoint_id.as_ref(), Some(&ep("a")));
            }
            other => panic!("Expected Connected, got {:?}", other),
        }
    }

    #[test]
    fn disconnect_keeps_previous_endpoint() {
        let mut tracker = LifecycleTracker::new();
        tracker.connection_result(ep("a"), Ok(()));
        assert!(tracker.disconnected(ep("a")));
        assert_eq!(tracker.state(), &ConnectionLifecycle::Disconnected);
        assert_eq!(tracker.previous_endpoint(), Some(&ep("a")));
    }

    #[test]
    fn stale_disconnect_does_not_drop_current_link() {
        let mut tracker = LifecycleTracker::new();
        tracker.connection_result(ep("b"), Ok(()));
        assert!(!tracker.disconnected(ep("a")));
        assert!(tracker.state().is_connected());
        assert_eq!(tracker.events().len(), 2);
    }

    #[test]
    fn failure_is_logged_and_not_counted() {
        let mut tracker = LifecycleTracker::new();
        tracker.connecting(ep("a"));
        tracker.connection_result(ep("a"), Err("rejected".into()));
        assert_eq!(tracker.connection_number(), 0);
        assert_eq!(tracker.state(), &ConnectionLifecycle::Disconnected);
        assert!(matches!(
            tracker.events().last(),
            Some(ConnectionEvent::ConnectionFailed { .. })
        ));
    }

    #[test]
    fn history_records_connected_snapshots() {
        let mut tracker = LifecycleTracker::new();
        tracker.connection_result(ep("a"), Ok(()));
        tracker.disconnected(ep("a"));
        tracker.connection_result(ep("b"), Ok(()));
        assert_eq!(tracker.history().len(), 2);
        assert!(tracker.history().iter().all(|s| s.is_connected()));
    }

    #[test]
    fn error_state_carries_reason() {
        let mut tracker = LifecycleTracker::new();
        tracker.error("could not reach peer");
        assert_eq!(
            tracker.state(),
            &ConnectionLifecycle::Error {
                reason: "could not reach peer".into()
            }
        );
    }
}
