//! Connection management.
//!
//! Feeds transport lifecycle events into the pure [`LifecycleTracker`] and
//! [`PeerDirectory`], runs collision retry timers, and publishes the
//! current [`ConnectionLifecycle`] over a watch channel.

use dashmap::DashMap;
use duel_core::{CollisionDecision, ConnectionLifecycle, LifecycleTracker, PeerDirectory};
use duel_types::{EndpointId, SessionId};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::transport::{ConnectOutcome, Transport, TransportError, TransportEvent};

/// A change to the link that the session cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    /// A link came up.
    Up {
        /// The peer.
        endpoint: EndpointId,
        /// We accepted the link.
        is_host: bool,
        /// A different peer was connected before.
        is_reconnection: bool,
    },
    /// The current link dropped.
    Down {
        /// The peer.
        endpoint: EndpointId,
    },
}

struct Shared {
    tracker: Mutex<LifecycleTracker>,
    peers: Mutex<PeerDirectory>,
    state_tx: watch::Sender<ConnectionLifecycle>,
}

impl Shared {
    fn publish(&self, tracker: &LifecycleTracker) {
        self.state_tx.send_replace(tracker.state().clone());
    }
}

/// Drives the connection lifecycle for one node.
pub struct ConnectionManager<T: Transport + 'static> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    retries: Arc<DashMap<EndpointId, JoinHandle<()>>>,
}

impl<T: Transport + 'static> ConnectionManager<T> {
    /// Create a manager advertising `local_session`.
    pub fn new(transport: Arc<T>, local_session: SessionId, config: &ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionLifecycle::Idle);
        Self {
            transport,
            shared: Arc::new(Shared {
                tracker: Mutex::new(LifecycleTracker::new()),
                peers: Mutex::new(PeerDirectory::with_policy(
                    local_session,
                    config.collision_backoff(),
                    config.max_connect_attempts,
                )),
                state_tx,
            }),
            retries: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionLifecycle> {
        self.shared.state_tx.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionLifecycle {
        self.shared.state_tx.borrow().clone()
    }

    /// Number of successful connections so far.
    pub fn connection_number(&self) -> u64 {
        self.with_tracker(|t| t.connection_number()).unwrap_or(0)
    }

    /// Endpoints currently visible.
    pub fn visible_peers(&self) -> Vec<EndpointId> {
        self.shared
            .peers
            .lock()
            .map(|p| p.visible())
            .unwrap_or_default()
    }

    /// Register a callback for detected reconnections.
    pub fn on_reconnection(&self, callback: duel_core::ReconnectionCallback) {
        self.with_tracker(|t| t.on_reconnection(callback));
    }

    /// Run `f` against the tracker's event log.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&mut LifecycleTracker) -> R) -> Option<R> {
        let mut tracker = self.shared.tracker.lock().ok()?;
        Some(f(&mut tracker))
    }

    /// Start advertising our session.
    pub async fn start_advertising(&self) -> Result<(), TransportError> {
        let session = self
            .shared
            .peers
            .lock()
            .map(|p| p.local_session())
            .map_err(|_| TransportError::Closed)?;
        self.transport.start_advertising(session).await?;
        self.update(|t| t.advertising_started());
        Ok(())
    }

    /// Start looking for peers.
    pub async fn start_discovery(&self) -> Result<(), TransportError> {
        self.transport.start_discovery().await?;
        self.update(|t| t.discovery_started());
        Ok(())
    }

    /// Dial `endpoint`.
    pub async fn connect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        self.update(|t| t.connecting(endpoint.clone()));
        self.transport.request_connection(endpoint).await
    }

    /// Drop the link to `endpoint`.
    pub async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        self.transport.disconnect(endpoint).await
    }

    /// Apply a transport event; returns a link change for the session.
    pub fn handle_event(&self, event: &TransportEvent) -> Option<LinkChange> {
        match event {
            TransportEvent::ConnectResult {
                endpoint,
                outcome: ConnectOutcome::Connected,
            } => {
                if let Some((_, handle)) = self.retries.remove(endpoint) {
                    handle.abort();
                }
                if let Ok(mut peers) = self.shared.peers.lock() {
                    peers.on_connected(endpoint);
                }
                let mut tracker = self.shared.tracker.lock().ok()?;
                let state = tracker.connection_result(endpoint.clone(), Ok(())).clone();
                self.shared.publish(&tracker);

                let ConnectionLifecycle::Connected {
                    connection_number,
                    is_reconnection,
                    ..
                } = state
                else {
                    return None;
                };
                let is_host = tracker.is_host();
                tracing::info!(
                    "Connected to {} (connection #{}, {})",
                    endpoint,
                    connection_number,
                    if is_host { "host" } else { "guest" }
                );
                Some(LinkChange::Up {
                    endpoint: endpoint.clone(),
                    is_host,
                    is_reconnection,
                })
            }
            TransportEvent::ConnectResult { endpoint, outcome } => {
                let reason = match outcome {
                    ConnectOutcome::Rejected(reason) => reason.clone(),
                    _ => "connection collision".to_string(),
                };
                self.connect_failed(endpoint, reason);
                None
            }
            TransportEvent::Disconnected { endpoint } => {
                let mut tracker = self.shared.tracker.lock().ok()?;
                let current = tracker.disconnected(endpoint.clone());
                self.shared.publish(&tracker);
                if current {
                    tracing::info!("Disconnected from {}", endpoint);
                    Some(LinkChange::Down {
                        endpoint: endpoint.clone(),
                    })
                } else {
                    tracing::debug!("Ignoring disconnect from stale endpoint {}", endpoint);
                    None
                }
            }
            TransportEvent::EndpointFound {
                endpoint,
                session_id,
            } => {
                if let Ok(mut peers) = self.shared.peers.lock() {
                    if peers.endpoint_found(endpoint.clone(), *session_id) {
                        tracing::info!("Found peer {}", endpoint);
                    }
                }
                None
            }
            TransportEvent::EndpointLost { endpoint } => {
                if let Ok(mut peers) = self.shared.peers.lock() {
                    if peers.endpoint_lost(endpoint) {
                        tracing::info!("Lost peer {}", endpoint);
                    } else if peers.is_retrying(endpoint) {
                        tracing::debug!("Keeping {} visible while a retry is pending", endpoint);
                    }
                }
                None
            }
            TransportEvent::Received { .. } => None,
        }
    }

    fn connect_failed(&self, endpoint: &EndpointId, reason: String) {
        let decision = match self.shared.peers.lock() {
            Ok(mut peers) => peers.on_rejected(endpoint),
            Err(_) => return,
        };

        match decision {
            CollisionDecision::Retry { delay, attempt } => {
                tracing::warn!(
                    "Connection to {} failed ({}), retry {} in {}ms",
                    endpoint,
                    reason,
                    attempt,
                    delay.as_millis()
                );
                self.update(|t| {
                    t.connection_result(endpoint.clone(), Err(reason));
                    t.collision(endpoint.clone(), attempt);
                });
                self.schedule_retry(endpoint.clone(), delay);
            }
            CollisionDecision::GiveUp { attempts } => {
                tracing::warn!(
                    "Giving up on {} after {} failed attempts",
                    endpoint,
                    attempts
                );
                self.update(|t| {
                    t.connection_result(endpoint.clone(), Err(reason));
                    t.error(format!(
                        "Could not connect to {} after {} attempts",
                        endpoint, attempts
                    ));
                });
            }
        }
    }

    fn schedule_retry(&self, endpoint: EndpointId, delay: std::time::Duration) {
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let retries = Arc::clone(&self.retries);
        let key = endpoint.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut peers) = shared.peers.lock() {
                peers.retry_fired(&endpoint);
            }
            if let Ok(mut tracker) = shared.tracker.lock() {
                tracker.connecting(endpoint.clone());
                shared.publish(&tracker);
            }
            retries.remove(&endpoint);
            if let Err(e) = transport.request_connection(&endpoint).await {
                tracing::warn!("Retry connect to {} failed: {}", endpoint, e);
            }
        });
        if let Some(old) = self.retries.insert(key, handle) {
            old.abort();
        }
    }

    fn update(&self, f: impl FnOnce(&mut LifecycleTracker)) {
        if let Ok(mut tracker) = self.shared.tracker.lock() {
            f(&mut tracker);
            self.shared.publish(&tracker);
        }
    }

    /// Cancel all pending collision retries.
    pub fn shutdown(&self) {
        let endpoints: Vec<EndpointId> = self.retries.iter().map(|e| e.key().clone()).collect();
        for endpoint in endpoints {
            if let Some((_, handle)) = self.retries.remove(&endpoint) {
                handle.abort();
            }
        }
    }
}

impl<T: Transport + 'static> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use duel_core::ConnectionEvent;
    use std::time::Duration;

    fn manager(session: SessionId) -> (ConnectionManager<MockTransport>, MockTransport) {
        let transport = MockTransport::new("me");
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            session,
            &ConnectionConfig::default(),
        );
        (manager, transport)
    }

    fn ordered_sessions() -> (SessionId, SessionId) {
        let a = SessionId::new();
        let b = SessionId::new();
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn collision(endpoint: &EndpointId) -> TransportEvent {
        TransportEvent::ConnectResult {
            endpoint: endpoint.clone(),
            outcome: ConnectOutcome::Collision,
        }
    }

    #[tokio::test]
    async fn initiator_is_guest() {
        let (manager, transport) = manager(SessionId::new());
        let peer = EndpointId::new("peer");
        manager.start_discovery().await.unwrap();
        manager.connect(&peer).await.unwrap();
        assert_eq!(transport.connection_requests(), vec![peer.clone()]);

        let change = manager.handle_event(&TransportEvent::ConnectResult {
            endpoint: peer.clone(),
            outcome: ConnectOutcome::Connected,
        });
        assert_eq!(
            change,
            Some(LinkChange::Up {
                endpoint: peer,
                is_host: false,
                is_reconnection: false
            })
        );
        assert_eq!(manager.connection_number(), 1);
    }

    #[tokio::test]
    async fn acceptor_is_host() {
        let (manager, transport) = manager(SessionId::new());
        manager.start_advertising().await.unwrap();
        assert!(transport.advertised_session().is_some());

        let change = manager.handle_event(&TransportEvent::ConnectResult {
            endpoint: EndpointId::new("peer"),
            outcome: ConnectOutcome::Connected,
        });
        assert!(matches!(change, Some(LinkChange::Up { is_host: true, .. })));
    }

    #[tokio::test]
    async fn watch_channel_publishes_state() {
        let (manager, _transport) = manager(SessionId::new());
        let rx = manager.subscribe();
        manager.start_discovery().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionLifecycle::Discovering);
    }

    #[tokio::test(start_paused = true)]
    async fn lower_session_retries_immediately() {
        let (low, high) = ordered_sessions();
        let (manager, transport) = manager(low);
        let peer = EndpointId::new("peer");
        manager.handle_event(&TransportEvent::EndpointFound {
            endpoint: peer.clone(),
            session_id: Some(high),
        });

        manager.connect(&peer).await.unwrap();
        manager.handle_event(&collision(&peer));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.connection_requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn higher_session_backs_off() {
        let (low, high) = ordered_sessions();
        let (manager, transport) = manager(high);
        let peer = EndpointId::new("peer");
        manager.handle_event(&TransportEvent::EndpointFound {
            endpoint: peer.clone(),
            session_id: Some(low),
        });

        manager.connect(&peer).await.unwrap();
        manager.handle_event(&collision(&peer));
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(transport.connection_requests().len(), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(transport.connection_requests().len(), 2);

        let collisions = manager
            .with_tracker(|t| {
                t.events()
                    .iter()
                    .filter(|e| matches!(e, ConnectionEvent::CollisionDetected { .. }))
                    .count()
            })
            .unwrap();
        assert_eq!(collisions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_peer_is_not_evicted() {
        let (manager, _transport) = manager(SessionId::new());
        let peer = EndpointId::new("peer");
        manager.handle_event(&TransportEvent::EndpointFound {
            endpoint: peer.clone(),
            session_id: None,
        });
        manager.handle_event(&collision(&peer));
        manager.handle_event(&TransportEvent::EndpointLost {
            endpoint: peer.clone(),
        });
        assert_eq!(manager.visible_peers(), vec![peer]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_collisions_surface_error() {
        let (manager, _transport) = manager(SessionId::new());
        let peer = EndpointId::new("peer");
        for _ in 0..4 {
            manager.handle_event(&collision(&peer));
        }
        assert!(matches!(
            manager.state(),
            ConnectionLifecycle::Error { reason } if reason.contains("peer")
        ));
    }

    #[tokio::test]
    async fn disconnect_of_current_peer_is_reported() {
        let (manager, _transport) = manager(SessionId::new());
        let peer = EndpointId::new("peer");
        manager.handle_event(&TransportEvent::ConnectResult {
            endpoint: peer.clone(),
            outcome: ConnectOutcome::Connected,
        });
        assert_eq!(
            manager.handle_event(&TransportEvent::Disconnected {
                endpoint: EndpointId::new("other")
            }),
            None
        );
        assert_eq!(
            manager.handle_event(&TransportEvent::Disconnected {
                endpoint: peer.clone()
            }),
            Some(LinkChange::Down { endpoint: peer })
        );
        assert_eq!(manager.state(), ConnectionLifecycle::Disconnected);
    }

    #[tokio::test]
    async fn reconnection_to_new_peer_is_flagged() {
        let (manager, _transport) = manager(SessionId::new());
        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&calls);
        manager.on_reconnection(Box::new(move |_, _| {
            *sink.lock().unwrap() += 1;
        }));

        for id in ["a", "b"] {
            let endpoint = EndpointId::new(id);
            manager.handle_event(&TransportEvent::ConnectResult {
                endpoint: endpoint.clone(),
                outcome: ConnectOutcome::Connected,
            });
            manager.handle_event(&TransportEvent::Disconnected { endpoint });
        }
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(manager.connection_number(), 2);
    }
}
