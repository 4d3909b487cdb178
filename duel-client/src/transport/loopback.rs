//! In-memory link between two transports.
//!
//! Used by the simulator and integration tests. Payload delivery can be
//! made lossy, duplicating and reordering from a seeded RNG, and the first
//! connection attempts can be forced to collide. Lifecycle events are
//! always delivered.

use super::{ConnectOutcome, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use duel_types::{EndpointId, SessionId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Link behaviour for payload traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConditions {
    /// Probability that a payload is dropped (0.0..=1.0).
    pub loss: f64,
    /// Probability that a delivered payload arrives twice (0.0..=1.0).
    pub duplicate: f64,
    /// Probability that a payload is held back and delivered after the
    /// next payload to the same side (0.0..=1.0).
    pub reorder: f64,
    /// Number of initial connection requests answered with a collision.
    pub collisions: u32,
    /// Seed for the loss/duplication RNG.
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss: 0.0,
            duplicate: 0.0,
            reorder: 0.0,
            collisions: 0,
            seed: 0,
        }
    }
}

#[derive(Debug)]
struct Side {
    endpoint: EndpointId,
    events: mpsc::UnboundedSender<TransportEvent>,
    advertising: Option<SessionId>,
    discovering: bool,
}

#[derive(Debug)]
struct Link {
    sides: [Side; 2],
    connected: bool,
    collisions_left: u32,
    loss: f64,
    duplicate: f64,
    reorder: f64,
    /// Payload held back per receiving side.
    held: [Option<Vec<u8>>; 2],
    rng: StdRng,
}

impl Link {
    fn emit(&self, side: usize, event: TransportEvent) {
        // Receiver gone means that node shut down; nothing to deliver to.
        let _ = self.sides[side].events.send(event);
    }
}

/// One end of an in-memory link.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    side: usize,
    link: Arc<Mutex<Link>>,
}

/// Create two connected-capable transports and their event streams.
pub fn loopback_pair(
    a: &str,
    b: &str,
    conditions: LinkConditions,
) -> (
    (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>),
    (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>),
) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let link = Arc::new(Mutex::new(Link {
        sides: [
            Side {
                endpoint: EndpointId::new(a),
                events: a_tx,
                advertising: None,
                discovering: false,
            },
            Side {
                endpoint: EndpointId::new(b),
                events: b_tx,
                advertising: None,
                discovering: false,
            },
        ],
        connected: false,
        collisions_left: conditions.collisions,
        loss: conditions.loss.clamp(0.0, 1.0),
        duplicate: conditions.duplicate.clamp(0.0, 1.0),
        reorder: conditions.reorder.clamp(0.0, 1.0),
        held: [None, None],
        rng: StdRng::seed_from_u64(conditions.seed),
    }));

    (
        (
            LoopbackTransport {
                side: 0,
                link: Arc::clone(&link),
            },
            a_rx,
        ),
        (LoopbackTransport { side: 1, link }, b_rx),
    )
}

impl LoopbackTransport {
    fn peer(&self) -> usize {
        1 - self.side
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Link>, TransportError> {
        self.link.lock().map_err(|_| TransportError::Closed)
    }

    /// Drop the link without either side asking, as a radio would.
    pub fn sever(&self) {
        if let Ok(mut link) = self.link.lock() {
            if link.connected {
                link.connected = false;
                link.held = [None, None];
                let (a, b) = (link.sides[0].endpoint.clone(), link.sides[1].endpoint.clone());
                link.emit(0, TransportEvent::Disconnected { endpoint: b });
                link.emit(1, TransportEvent::Disconnected { endpoint: a });
            }
        }
    }

    /// Whether the link is currently up.
    pub fn is_connected(&self) -> bool {
        self.link.lock().map(|l| l.connected).unwrap_or(false)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_endpoint(&self) -> EndpointId {
        self.link
            .lock()
            .map(|l| l.sides[self.side].endpoint.clone())
            .unwrap_or_else(|_| EndpointId::new("closed"))
    }

    async fn send_raw(&self, endpoint: &EndpointId, data: &[u8]) -> Result<(), TransportError> {
        let mut link = self.lock()?;
        let peer = self.peer();
        if !link.connected || link.sides[peer].endpoint != *endpoint {
            return Err(TransportError::NotConnected(endpoint.clone()));
        }

        let loss = link.loss;
        let duplicate = link.duplicate;
        if loss > 0.0 && link.rng.gen_bool(loss) {
            tracing::trace!("Loopback: dropped {} bytes to {}", data.len(), endpoint);
            return Ok(());
        }
        let reorder = link.reorder;
        if reorder > 0.0 && link.held[peer].is_none() && link.rng.gen_bool(reorder) {
            tracing::trace!("Loopback: holding back {} bytes to {}", data.len(), endpoint);
            link.held[peer] = Some(data.to_vec());
            return Ok(());
        }
        let copies = if duplicate > 0.0 && link.rng.gen_bool(duplicate) {
            2
        } else {
            1
        };

        let from = link.sides[self.side].endpoint.clone();
        for _ in 0..copies {
            link.emit(
                peer,
                TransportEvent::Received {
                    endpoint: from.clone(),
                    bytes: data.to_vec(),
                },
            );
        }
        if let Some(late) = link.held[peer].take() {
            link.emit(
                peer,
                TransportEvent::Received {
                    endpoint: from,
                    bytes: late,
                },
            );
        }
        Ok(())
    }

    async fn request_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut link = self.lock()?;
        let peer = self.peer();
        if link.sides[peer].endpoint != *endpoint {
            return Err(TransportError::ConnectionFailed(format!(
                "unknown endpoint {}",
                endpoint
            )));
        }

        if link.collisions_left > 0 {
            link.collisions_left -= 1;
            link.emit(
                self.side,
                TransportEvent::ConnectResult {
                    endpoint: endpoint.clone(),
                    outcome: ConnectOutcome::Collision,
                },
            );
            return Ok(());
        }

        link.connected = true;
        let me = link.sides[self.side].endpoint.clone();
        link.emit(
            self.side,
            TransportEvent::ConnectResult {
                endpoint: endpoint.clone(),
                outcome: ConnectOutcome::Connected,
            },
        );
        link.emit(
            peer,
            TransportEvent::ConnectResult {
                endpoint: me,
                outcome: ConnectOutcome::Connected,
            },
        );
        Ok(())
    }

    async fn start_advertising(&self, session: SessionId) -> Result<(), TransportError> {
        let mut link = self.lock()?;
        link.sides[self.side].advertising = Some(session);
        let peer = self.peer();
        if link.sides[peer].discovering {
            let me = link.sides[self.side].endpoint.clone();
            link.emit(
                peer,
                TransportEvent::EndpointFound {
                    endpoint: me,
                    session_id: Some(session),
                },
            );
        }
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        let mut link = self.lock()?;
        link.sides[self.side].discovering = true;
        let peer = self.peer();
        if let Some(session) = link.sides[peer].advertising {
            let them = link.sides[peer].endpoint.clone();
            link.emit(
                self.side,
                TransportEvent::EndpointFound {
                    endpoint: them,
                    session_id: Some(session),
                },
            );
        }
        Ok(())
    }

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        {
            let link = self.lock()?;
            if link.sides[self.peer()].endpoint != *endpoint {
                return Err(TransportError::NotConnected(endpoint.clone()));
            }
        }
        self.sever();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair(
        conditions: LinkConditions,
    ) -> (
        (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>),
        (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>),
    ) {
        let ((a, mut a_rx), (b, mut b_rx)) = loopback_pair("a", "b", conditions);
        a.request_connection(&EndpointId::new("b")).await.unwrap();
        a_rx.recv().await.unwrap();
        b_rx.recv().await.unwrap();
        ((a, a_rx), (b, b_rx))
    }

    #[tokio::test]
    async fn discovery_sees_advertiser() {
        let ((a, _a_rx), (b, mut b_rx)) = loopback_pair("a", "b", LinkConditions::default());
        let session = SessionId::new();
        a.start_advertising(session).await.unwrap();
        b.start_discovery().await.unwrap();

        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::EndpointFound {
                endpoint: EndpointId::new("a"),
                session_id: Some(session)
            })
        );
    }

    #[tokio::test]
    async fn connect_notifies_both_sides() {
        let ((a, mut a_rx), (_b, mut b_rx)) = loopback_pair("a", "b", LinkConditions::default());
        a.request_connection(&EndpointId::new("b")).await.unwrap();

        assert_eq!(
            a_rx.recv().await,
            Some(TransportEvent::ConnectResult {
                endpoint: EndpointId::new("b"),
                outcome: ConnectOutcome::Connected
            })
        );
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::ConnectResult {
                endpoint: EndpointId::new("a"),
                outcome: ConnectOutcome::Connected
            })
        );
        assert!(a.is_connected());
    }

    #[tokio::test]
    async fn forced_collisions_come_first() {
        let conditions = LinkConditions {
            collisions: 1,
            ..LinkConditions::default()
        };
        let ((a, mut a_rx), _b) = loopback_pair("a", "b", conditions);
        a.request_connection(&EndpointId::new("b")).await.unwrap();
        assert!(matches!(
            a_rx.recv().await,
            Some(TransportEvent::ConnectResult {
                outcome: ConnectOutcome::Collision,
                ..
            })
        ));
        assert!(!a.is_connected());

        a.request_connection(&EndpointId::new("b")).await.unwrap();
        assert!(a.is_connected());
    }

    #[tokio::test]
    async fn send_requires_link() {
        let ((a, _), _b) = loopback_pair("a", "b", LinkConditions::default());
        let result = a.send_raw(&EndpointId::new("b"), b"hi").await;
        assert!(matches!(result, Err(TransportError::NotConnected(_))));
    }

    #[tokio::test]
    async fn payload_arrives_at_peer() {
        let ((a, _), (_b, mut b_rx)) = connected_pair(LinkConditions::default()).await;
        a.send_raw(&EndpointId::new("b"), b"hello").await.unwrap();
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::Received {
                endpoint: EndpointId::new("a"),
                bytes: b"hello".to_vec()
            })
        );
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let conditions = LinkConditions {
            loss: 1.0,
            ..LinkConditions::default()
        };
        let ((a, _), (_b, mut b_rx)) = connected_pair(conditions).await;
        for _ in 0..10 {
            a.send_raw(&EndpointId::new("b"), b"x").await.unwrap();
        }
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_duplication_doubles_payloads() {
        let conditions = LinkConditions {
            duplicate: 1.0,
            ..LinkConditions::default()
        };
        let ((a, _), (_b, mut b_rx)) = connected_pair(conditions).await;
        a.send_raw(&EndpointId::new("b"), b"x").await.unwrap();
        assert!(b_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_reorder_swaps_neighbours() {
        let conditions = LinkConditions {
            reorder: 1.0,
            ..LinkConditions::default()
        };
        let ((a, _), (_b, mut b_rx)) = connected_pair(conditions).await;
        for payload in [b"1", b"2", b"3", b"4"] {
            a.send_raw(&EndpointId::new("b"), payload).await.unwrap();
        }

        let mut order = Vec::new();
        while let Ok(TransportEvent::Received { bytes, .. }) = b_rx.try_recv() {
            order.extend(bytes);
        }
        assert_eq!(order, b"2143".to_vec());
    }

    #[tokio::test]
    async fn sever_notifies_both_sides() {
        let ((a, mut a_rx), (_b, mut b_rx)) = connected_pair(LinkConditions::default()).await;
        a.sever();
        assert_eq!(
            a_rx.recv().await,
            Some(TransportEvent::Disconnected {
                endpoint: EndpointId::new("b")
            })
        );
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::Disconnected {
                endpoint: EndpointId::new("a")
            })
        );
    }
}
