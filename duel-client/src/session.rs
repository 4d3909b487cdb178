//! BattleSession - the async driver for one battle.
//!
//! Wraps the pure [`BattleSessionState`] machine from duel-core and
//! interprets its [`SessionAction`]s: sending messages through the
//! [`ReliableChannel`], loading artwork and updating the [`CardStore`],
//! running the ready timer and computing the outcome on the host.
//!
//! ```text
//! UI / node → BattleSession → ReliableChannel → Transport
//!                  ↓
//!             duel-core (pure state machine)
//! ```
//!
//! Every applied event publishes the new immutable snapshot on a watch
//! channel. Timer ticks are fed back through an internal queue, drained by
//! a background task that holds only a weak reference to the session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use duel_core::{compute_battle, BattleSessionState, SessionAction, SessionEvent};
use duel_types::{Card, CardId, EndpointId, ImageTransfer, Message, SessionId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Duration, Instant};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::reliability::ReliableChannel;
use crate::store::CardStore;
use crate::transport::Transport;

struct SessionInner<T: Transport + 'static> {
    channel: Arc<ReliableChannel<T>>,
    store: Arc<dyn CardStore>,
    config: SessionConfig,
    state: tokio::sync::Mutex<BattleSessionState>,
    state_tx: watch::Sender<Arc<BattleSessionState>>,
    peer: Mutex<Option<EndpointId>>,
    ready_timer: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// One battle between the local player and a peer.
///
/// Cheap to clone; clones share the same session.
pub struct BattleSession<T: Transport + 'static> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport + 'static> Clone for BattleSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> BattleSession<T> {
    /// Create a session waiting for a peer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        channel: Arc<ReliableChannel<T>>,
        store: Arc<dyn CardStore>,
        config: SessionConfig,
    ) -> Self {
        let state = BattleSessionState::new(SessionId::new());
        let (state_tx, _) = watch::channel(Arc::new(state.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SessionInner {
            channel,
            store,
            config,
            state: tokio::sync::Mutex::new(state),
            state_tx,
            peer: Mutex::new(None),
            ready_timer: Mutex::new(None),
            events_tx,
        });
        spawn_event_loop(Arc::downgrade(&inner), events_rx);
        Self { inner }
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BattleSessionState>> {
        self.inner.state_tx.subscribe()
    }

    /// The latest state snapshot.
    pub fn snapshot(&self) -> Arc<BattleSessionState> {
        Arc::clone(&self.inner.state_tx.borrow())
    }

    /// The peer this session talks to.
    pub fn peer(&self) -> Option<EndpointId> {
        self.inner.peer.lock().ok().and_then(|p| p.clone())
    }

    /// A link to `endpoint` came up.
    pub async fn peer_connected(
        &self,
        endpoint: EndpointId,
        is_host: bool,
        is_reconnection: bool,
    ) -> Result<Arc<BattleSessionState>> {
        if let Ok(mut peer) = self.inner.peer.lock() {
            *peer = Some(endpoint);
        }
        self.inner
            .apply(SessionEvent::PeerConnected {
                is_host,
                is_reconnection,
            })
            .await
    }

    /// The link to the peer dropped.
    pub async fn peer_disconnected(&self) -> Result<Arc<BattleSessionState>> {
        self.inner.apply(SessionEvent::PeerDisconnected).await
    }

    /// Choose the card to battle with.
    pub async fn select_card(&self, card: Card) -> Result<Arc<BattleSessionState>> {
        self.inner.apply(SessionEvent::SelectCard(card)).await
    }

    /// Click ready.
    pub async fn set_ready(&self) -> Result<Arc<BattleSessionState>> {
        self.inner.apply(SessionEvent::SetReady).await
    }

    /// The story finished playing.
    pub async fn playback_finished(&self) -> Result<Arc<BattleSessionState>> {
        self.inner.apply(SessionEvent::PlaybackFinished).await
    }

    /// Apply a message from the peer.
    pub async fn handle_message(&self, message: Message) -> Result<Arc<BattleSessionState>> {
        self.inner.apply(SessionEvent::Received(message)).await
    }

    /// Cancel timers and retries and start over with a fresh session.
    pub async fn stop_all(&self) {
        self.inner.cancel_ready_timer();
        self.inner.channel.stop_all();
        let mut state = self.inner.state.lock().await;
        *state = BattleSessionState::new(SessionId::new());
        self.inner.state_tx.send_replace(Arc::new(state.clone()));
        if let Ok(mut peer) = self.inner.peer.lock() {
            *peer = None;
        }
    }
}

fn spawn_event_loop<T: Transport + 'static>(
    inner: Weak<SessionInner<T>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if let Err(e) = inner.apply(event).await {
                tracing::debug!("Timer event rejected: {}", e);
            }
        }
    })
}

impl<T: Transport + 'static> SessionInner<T> {
    /// Run `event` and every event its actions produce.
    ///
    /// Only a rejection of `event` itself is returned; follow-up events are
    /// internal and merely logged.
    async fn apply(&self, event: SessionEvent) -> Result<Arc<BattleSessionState>> {
        let mut state = self.state.lock().await;
        let mut queue = VecDeque::from([event]);
        let mut first = true;

        while let Some(event) = queue.pop_front() {
            let (next, actions) = match state.on_event(event) {
                Ok(transition) => transition,
                Err(e) if first => return Err(SessionError::Command(e)),
                Err(e) => {
                    tracing::warn!("Internal session event rejected: {}", e);
                    continue;
                }
            };
            first = false;

            if next.phase != state.phase {
                tracing::info!(
                    "{} [{}]: {} -> {}",
                    self.config.local_name,
                    next.session_id,
                    state.phase,
                    next.phase
                );
            }
            *state = next;
            self.state_tx.send_replace(Arc::new(state.clone()));

            for action in actions {
                self.execute(action, &mut queue).await;
            }
        }

        Ok(Arc::new(state.clone()))
    }

    async fn execute(&self, action: SessionAction, queue: &mut VecDeque<SessionEvent>) {
        match action {
            SessionAction::Send(message) => self.send(message).await,
            SessionAction::SendImage { card_id, image_ref } => {
                self.send_image(card_id, image_ref).await
            }
            SessionAction::StartReadyTimer => self.start_ready_timer(),
            SessionAction::CancelReadyTimer => self.cancel_ready_timer(),
            SessionAction::ComputeBattle { local, opponent } => {
                let seed = self.config.battle_seed.unwrap_or_else(rand::random);
                tracing::debug!(
                    "Computing battle {} vs {} (seed {})",
                    local.base.id,
                    opponent.base.id,
                    seed
                );
                queue.push_back(SessionEvent::BattleComputed(compute_battle(
                    &local, &opponent, seed,
                )));
            }
            SessionAction::TransferCards { won, lost } => {
                if let Some(card) = won {
                    if let Err(e) = self.store.transfer_won_card(card).await {
                        tracing::warn!("Failed to add won card: {}", e);
                    }
                }
                if let Some(card_id) = lost {
                    if let Err(e) = self.store.delete_lost_card(&card_id).await {
                        tracing::warn!("Failed to remove lost card {}: {}", card_id, e);
                    }
                }
            }
            SessionAction::Ignored { reason } => tracing::debug!("Ignored: {}", reason),
            SessionAction::Mismatch { reason } => tracing::warn!("State mismatch: {}", reason),
        }
    }

    async fn send(&self, message: Message) {
        let Some(peer) = self.peer.lock().ok().and_then(|p| p.clone()) else {
            tracing::debug!("No peer, dropping {}", message.msg_type());
            return;
        };
        let envelope = match message.to_reliable() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", message.msg_type(), e);
                return;
            }
        };
        tracing::debug!("Sending {} to {}", envelope.msg_type, peer);
        if let Err(e) = self.channel.send(&peer, envelope).await {
            tracing::warn!("Failed to send {} to {}: {}", message.msg_type(), peer, e);
        }
    }

    async fn send_image(&self, card_id: CardId, image_ref: String) {
        let data = match self.store.load_image(&card_id).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::warn!("No artwork stored for {}, sending empty image", card_id);
                String::new()
            }
            Err(e) => {
                tracing::warn!("Failed to load artwork for {}: {}", card_id, e);
                String::new()
            }
        };
        self.send(Message::ImageTransfer(ImageTransfer {
            card_id,
            image_ref,
            data,
        }))
        .await;
    }

    fn start_ready_timer(&self) {
        let timeout = self.config.ready_timeout();
        let nudge = self.config.state_sync_interval().max(Duration::from_millis(1));
        let events = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            let mut ticker = interval_at(Instant::now() + nudge, nudge);
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => {
                        let _ = events.send(SessionEvent::ReadyTimeoutElapsed {
                            waited_secs: timeout.as_secs(),
                        });
                        break;
                    }
                    _ = ticker.tick() => {
                        if events.send(SessionEvent::SyncNudge).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        if let Ok(mut timer) = self.ready_timer.lock() {
            if let Some(old) = timer.replace(handle) {
                old.abort();
            }
        }
    }

    fn cancel_ready_timer(&self) {
        if let Ok(mut timer) = self.ready_timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

impl<T: Transport + 'static> Drop for SessionInner<T> {
    fn drop(&mut self) {
        self.cancel_ready_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReliabilityConfig;
    use crate::store::MemoryCardStore;
    use crate::transport::MockTransport;
    use duel_core::BattlePhase;
    use duel_types::{
        CardSelected, Frame, MessageType, PlayerReady, Rarity, ReadyAck, StateSyncRequest,
    };

    fn card(id: &str, attack: i32, health: i32) -> Card {
        Card {
            id: CardId::new(id),
            name: id.to_string(),
            image_ref: format!("art/{}.png", id),
            rarity: Rarity::Common,
            base_attack: attack,
            base_health: health,
        }
    }

    struct Fixture {
        session: BattleSession<MockTransport>,
        transport: MockTransport,
        store: Arc<MemoryCardStore>,
    }

    fn fixture() -> Fixture {
        let transport = MockTransport::new("me");
        let channel = Arc::new(ReliableChannel::new(
            Arc::new(transport.clone()),
            &ReliabilityConfig::default(),
        ));
        let store = Arc::new(MemoryCardStore::new());
        store.insert(card("mine", 30, 100), "my-art");
        let config = SessionConfig {
            battle_seed: Some(7),
            ..SessionConfig::default()
        };
        let session = BattleSession::new(channel, store.clone(), config);
        Fixture {
            session,
            transport,
            store,
        }
    }

    /// Distinct messages sent, ignoring retransmissions.
    fn sent_messages(transport: &MockTransport) -> Vec<Message> {
        let mut seen = std::collections::HashSet::new();
        transport
            .sent_frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Message(m) if seen.insert(m.message_id.clone()) => {
                    Message::from_reliable(&m).ok()
                }
                _ => None,
            })
            .collect()
    }

    fn count_of(transport: &MockTransport, msg_type: MessageType) -> usize {
        sent_messages(transport)
            .iter()
            .filter(|m| m.msg_type() == msg_type)
            .count()
    }

    async fn connected(is_host: bool) -> Fixture {
        let f = fixture();
        f.session
            .peer_connected(EndpointId::new("peer"), is_host, false)
            .await
            .unwrap();
        f
    }

    #[tokio::test]
    async fn select_before_connect_is_rejected() {
        let f = fixture();
        let err = f.session.select_card(card("mine", 30, 100)).await.unwrap_err();
        assert!(matches!(err, SessionError::Command(_)));
        assert_eq!(f.session.snapshot().version, 0);
    }

    #[tokio::test]
    async fn selecting_sends_preview_only() {
        let f = connected(true).await;
        let state = f.session.select_card(card("mine", 30, 100)).await.unwrap();
        assert_eq!(state.version, 2);

        let sent = sent_messages(&f.transport);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::CardSelected(selected) => assert!(selected.is_preview()),
            other => panic!("expected preview, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ready_sends_full_card_image_and_ready() {
        let f = connected(true).await;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.set_ready().await.unwrap();

        let sent = sent_messages(&f.transport);
        assert!(sent.iter().any(|m| matches!(
            m,
            Message::CardSelected(s) if !s.is_preview()
        )));
        assert!(sent.iter().any(|m| matches!(
            m,
            Message::ImageTransfer(img) if img.data == "my-art"
        )));
        assert!(sent.iter().any(|m| matches!(m, Message::PlayerReady(_))));
    }

    #[tokio::test]
    async fn ready_without_card_is_rejected() {
        let f = connected(true).await;
        let err = f.session.set_ready().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "command rejected: select a card before clicking ready"
        );
    }

    #[tokio::test]
    async fn watchers_see_every_change() {
        let f = fixture();
        let mut rx = f.session.subscribe();
        f.session
            .peer_connected(EndpointId::new("peer"), false, false)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, BattlePhase::CardSelection);
        assert!(!rx.borrow().is_host);
    }

    #[tokio::test]
    async fn sync_request_is_answered() {
        let f = connected(false).await;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session
            .handle_message(Message::StateSyncRequest(StateSyncRequest {
                session_id: SessionId::new(),
            }))
            .await
            .unwrap();

        let response = sent_messages(&f.transport).into_iter().find_map(|m| match m {
            Message::StateSyncResponse(r) => Some(r),
            _ => None,
        });
        let response = response.unwrap();
        assert!(response.has_selected_card);
        assert!(!response.is_ready);
        assert_eq!(response.card.map(|p| p.id), Some(CardId::new("mine")));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_timer_nudges_then_times_out() {
        let f = connected(true).await;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.set_ready().await.unwrap();

        let mut rx = f.session.subscribe();
        tokio::time::sleep(Duration::from_secs(46)).await;
        rx.wait_for(|s| s.phase == BattlePhase::Disconnected)
            .await
            .unwrap();

        assert_eq!(count_of(&f.transport, MessageType::StateSyncRequest), 4);
        assert_eq!(count_of(&f.transport, MessageType::ReadyTimeout), 1);
        let state = f.session.snapshot();
        assert!(!state.local.is_ready);
        assert!(state.status_message.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_ready_timer() {
        let f = connected(true).await;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.set_ready().await.unwrap();
        f.session.peer_disconnected().await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count_of(&f.transport, MessageType::StateSyncRequest), 0);
        assert_eq!(count_of(&f.transport, MessageType::ReadyTimeout), 0);
        assert_eq!(f.session.snapshot().phase, BattlePhase::Disconnected);
    }

    async fn feed_opponent(session: &BattleSession<MockTransport>, opponent: &Card) {
        session
            .handle_message(Message::CardSelected(CardSelected::full(opponent)))
            .await
            .unwrap();
        session
            .handle_message(Message::ImageTransfer(ImageTransfer {
                card_id: opponent.id.clone(),
                image_ref: opponent.image_ref.clone(),
                data: "their-art".into(),
            }))
            .await
            .unwrap();
        session
            .handle_message(Message::PlayerReady(PlayerReady {
                card_id: opponent.id.clone(),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn host_computes_and_streams_battle() {
        let f = connected(true).await;
        let opponent = card("theirs", 25, 90);
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.set_ready().await.unwrap();
        feed_opponent(&f.session, &opponent).await;
        assert_eq!(count_of(&f.transport, MessageType::ReadyAck), 1);

        let state = f
            .session
            .handle_message(Message::ReadyAck(ReadyAck {
                card_id: CardId::new("mine"),
            }))
            .await
            .unwrap();

        assert_eq!(state.phase, BattlePhase::BattleAnimating);
        assert!(state.commit_fired);
        let result = state.result.clone().unwrap();
        assert_eq!(
            count_of(&f.transport, MessageType::StorySegment),
            state.story.len()
        );
        assert_eq!(count_of(&f.transport, MessageType::RevealStart), 1);
        assert_eq!(count_of(&f.transport, MessageType::BattleResult), 1);

        let done = f.session.playback_finished().await.unwrap();
        assert_eq!(done.phase, BattlePhase::BattleComplete);
        assert!(done.cards_transferred);
        match result.winner_is_local {
            Some(true) => {
                assert!(f.store.contains(&CardId::new("theirs")));
                assert!(f.store.contains(&CardId::new("mine")));
            }
            _ => assert!(!f.store.contains(&CardId::new("mine"))),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn guest_missing_story_nudges_then_gives_up() {
        let f = connected(false).await;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.set_ready().await.unwrap();
        feed_opponent(&f.session, &card("theirs", 25, 90)).await;
        let state = f
            .session
            .handle_message(Message::ReadyAck(ReadyAck {
                card_id: CardId::new("mine"),
            }))
            .await
            .unwrap();
        assert!(state.commit_fired);
        assert!(state.is_waiting_for_story());

        let mut rx = f.session.subscribe();
        tokio::time::sleep(Duration::from_secs(46)).await;
        rx.wait_for(|s| s.phase == BattlePhase::Disconnected)
            .await
            .unwrap();

        assert_eq!(count_of(&f.transport, MessageType::StateSyncRequest), 4);
        assert_eq!(count_of(&f.transport, MessageType::ReadyTimeout), 0);
        let status = f.session.snapshot().status_message.clone().unwrap();
        assert!(status.contains("story"), "{}", status);
    }

    #[tokio::test]
    async fn playback_before_battle_is_rejected() {
        let f = connected(true).await;
        assert!(f.session.playback_finished().await.is_err());
    }

    #[tokio::test]
    async fn stop_all_starts_over() {
        let f = connected(true).await;
        let before = f.session.snapshot().session_id;
        f.session.select_card(card("mine", 30, 100)).await.unwrap();
        f.session.stop_all().await;

        let state = f.session.snapshot();
        assert_eq!(state.version, 0);
        assert_eq!(state.phase, BattlePhase::WaitingForOpponent);
        assert_ne!(state.session_id, before);
        assert_eq!(f.session.peer(), None);
    }
}
