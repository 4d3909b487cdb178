//! DuelNode - one peer, fully wired.
//!
//! Owns the connection manager, the reliable channel and the battle
//! session for a single transport, and routes [`TransportEvent`]s between
//! them. Keepalives are answered here and never reach the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duel_types::{now_millis, EndpointId, Message, Ping};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DuelConfig;
use crate::connection::{ConnectionManager, LinkChange};
use crate::error::{Result, SessionError};
use crate::reliability::ReliableChannel;
use crate::session::BattleSession;
use crate::store::CardStore;
use crate::transport::{Transport, TransportEvent};

const RTT_UNKNOWN: u64 = u64::MAX;

/// A single peer: transport, connection lifecycle, reliability and session.
pub struct DuelNode<T: Transport + 'static> {
    connection: ConnectionManager<T>,
    channel: Arc<ReliableChannel<T>>,
    session: BattleSession<T>,
    rtt_ms: AtomicU64,
}

impl<T: Transport + 'static> DuelNode<T> {
    /// Wire up a node over `transport`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(transport: T, store: Arc<dyn CardStore>, config: &DuelConfig) -> Self {
        let transport = Arc::new(transport);
        let channel = Arc::new(ReliableChannel::new(
            Arc::clone(&transport),
            &config.reliability,
        ));
        let session = BattleSession::new(Arc::clone(&channel), store, config.session.clone());
        let connection = ConnectionManager::new(
            transport,
            session.snapshot().session_id,
            &config.connection,
        );

        Self {
            connection,
            channel,
            session,
            rtt_ms: AtomicU64::new(RTT_UNKNOWN),
        }
    }

    /// Our endpoint id.
    pub fn local_endpoint(&self) -> EndpointId {
        self.channel.transport().local_endpoint()
    }

    /// The battle session.
    pub fn session(&self) -> &BattleSession<T> {
        &self.session
    }

    /// The connection manager.
    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    /// The reliable channel.
    pub fn channel(&self) -> &Arc<ReliableChannel<T>> {
        &self.channel
    }

    /// Last measured round-trip time.
    pub fn rtt(&self) -> Option<Duration> {
        match self.rtt_ms.load(Ordering::Relaxed) {
            RTT_UNKNOWN => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Advertise our session so peers can dial us.
    pub async fn start_advertising(&self) -> Result<()> {
        Ok(self.connection.start_advertising().await?)
    }

    /// Look for peers.
    pub async fn start_discovery(&self) -> Result<()> {
        Ok(self.connection.start_discovery().await?)
    }

    /// Dial `endpoint`.
    pub async fn connect(&self, endpoint: &EndpointId) -> Result<()> {
        Ok(self.connection.connect(endpoint).await?)
    }

    /// Send a keepalive probe to the peer.
    pub async fn ping(&self) -> Result<()> {
        let peer = self.session.peer().ok_or(SessionError::NoPeer)?;
        let ping = Message::Ping(Ping {
            sent_at: now_millis(),
        });
        self.channel.send(&peer, ping.to_reliable()?).await?;
        Ok(())
    }

    /// Route one transport event.
    pub async fn handle_event(&self, event: TransportEvent) -> Result<()> {
        let TransportEvent::Received { endpoint, bytes } = &event else {
            match self.connection.handle_event(&event) {
                Some(LinkChange::Up {
                    endpoint,
                    is_host,
                    is_reconnection,
                }) => {
                    self.session
                        .peer_connected(endpoint, is_host, is_reconnection)
                        .await?;
                }
                Some(LinkChange::Down { .. }) => {
                    self.session.peer_disconnected().await?;
                }
                None => {}
            }
            return Ok(());
        };

        let Some(envelope) = self.channel.receive(endpoint, bytes).await else {
            return Ok(());
        };
        let message = match Message::from_reliable(&envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "Dropping undecodable {} from {}: {}",
                    envelope.msg_type,
                    endpoint,
                    e
                );
                return Ok(());
            }
        };
        tracing::trace!("Received {} from {}", envelope.msg_type, endpoint);

        match message {
            Message::Ping(ping) => {
                let pong = Message::Pong(ping).to_reliable()?;
                self.channel.send(endpoint, pong).await?;
            }
            Message::Pong(pong) => {
                let rtt = now_millis().saturating_sub(pong.sent_at);
                self.rtt_ms.store(rtt, Ordering::Relaxed);
                tracing::debug!("RTT to {}: {}ms", endpoint, rtt);
            }
            other => {
                self.session.handle_message(other).await?;
            }
        }
        Ok(())
    }

    /// Drive the node from a transport event stream until it closes.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = self.handle_event(event).await {
                    tracing::warn!("{}: event handling failed: {}", self.local_endpoint(), e);
                }
            }
            tracing::debug!("{}: transport event stream closed", self.local_endpoint());
        })
    }

    /// Cancel every timer and retry and reset the session.
    pub async fn stop_all(&self) {
        self.connection.shutdown();
        self.session.stop_all().await;
    }
}
