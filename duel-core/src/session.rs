//! Battle session state machine.
//!
//! A pure state machine for one battle between two peers. It takes local
//! commands, peer messages and timer ticks as [`SessionEvent`]s and returns
//! the next immutable [`BattleSessionState`] plus a list of
//! [`SessionAction`]s for `duel-client` to execute.
//!
//! Every event that changes the state, and every accepted local command,
//! yields `version = previous + 1`; other events that change nothing
//! return an identical state.
//!
//! After the commit the guest keeps the ready timer armed until it holds
//! the whole story. Its nudges make the host stream the battle again, and
//! the deadline ends the session if the story never completes.
//!
//! ## Two-phase ready commit
//!
//! The reveal happens only once all four flags hold:
//! - `local.is_ready`: we clicked ready
//! - `opponent.is_ready`: the peer's PLAYER_READY (or a sync response
//!   reporting ready) arrived
//! - `opponent.data_complete`: we hold the peer's preview, stats and image
//!   and sent READY_ACK for that card
//! - `local.data_complete`: the peer's READY_ACK for our card arrived
//!
//! The commit runs exactly once per session (`commit_fired`), and no flag
//! is ever cleared afterwards.

use std::fmt;

use duel_types::{
    BattleResult, BattleStart, BattleStorySegment, BattleVerdict, Card, CardId, CardPreview,
    CardSelected, ImageRequest, Message, PlayerReady, ReadyAck, ReadyTimeout, RevealStart,
    SessionId, StateSyncRequest, StateSyncResponse, StorySegment,
};

use crate::card::BattleCard;
use crate::outcome::BattleOutcome;
use crate::story::StoryAssembler;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BattlePhase {
    /// No peer connected yet.
    WaitingForOpponent,
    /// Both players choose cards and click ready.
    CardSelection,
    /// Commit reached; waiting for the battle story.
    ReadyToBattle,
    /// Story is playing.
    BattleAnimating,
    /// Playback finished, cards transferred.
    BattleComplete,
    /// Peer lost or gave up.
    Disconnected,
}

impl BattlePhase {
    /// Whether the session can still change meaningfully.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BattleComplete | Self::Disconnected)
    }
}

impl fmt::Display for BattlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitingForOpponent => "waiting for opponent",
            Self::CardSelection => "card selection",
            Self::ReadyToBattle => "ready to battle",
            Self::BattleAnimating => "battle animating",
            Self::BattleComplete => "battle complete",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// One player's side of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSlot {
    /// A card has been chosen.
    pub has_selected_card: bool,
    /// Identity of the chosen card (stats withheld).
    pub preview: Option<CardPreview>,
    /// Full card with effective stats, once known.
    pub card: Option<BattleCard>,
    /// Card whose artwork has been received.
    pub image: Option<CardId>,
    /// Player clicked ready.
    pub is_ready: bool,
    /// Card data exchange explicitly acknowledged.
    pub data_complete: bool,
}

impl PlayerSlot {
    /// Id of the chosen card.
    pub fn card_id(&self) -> Option<&CardId> {
        self.card
            .as_ref()
            .map(|c| &c.base.id)
            .or_else(|| self.preview.as_ref().map(|p| &p.id))
    }

    /// Whether the artwork for the chosen card is held.
    pub fn has_image(&self) -> bool {
        self.image.is_some() && self.image.as_ref() == self.card_id()
    }

    /// Whether preview, full stats and image are all held.
    pub fn holds_full_data(&self) -> bool {
        self.preview.is_some() && self.card.is_some() && self.has_image()
    }
}

/// Immutable snapshot of a battle session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleSessionState {
    /// Fixed for the lifetime of the session.
    pub session_id: SessionId,
    /// Increments by one on every mutation.
    pub version: u64,
    /// Current phase.
    pub phase: BattlePhase,
    /// Our side.
    pub local: PlayerSlot,
    /// The peer's side.
    pub opponent: PlayerSlot,
    /// We accepted the connection and compute the outcome.
    pub is_host: bool,
    /// User-visible notice.
    pub status_message: Option<String>,
    /// Story segments, local perspective, in order.
    pub story: Vec<BattleStorySegment>,
    /// Verdict, local perspective.
    pub result: Option<BattleResult>,
    /// The two-phase commit has run.
    pub commit_fired: bool,
    /// Cards were handed to the collection.
    pub cards_transferred: bool,
    /// Host announced the battle stream (guest only).
    pub battle_started: bool,
    /// Segments received so far (guest only).
    pub assembler: StoryAssembler,
}

/// Input to the session state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A link to the peer came up.
    PeerConnected {
        /// We accepted the connection.
        is_host: bool,
        /// A different endpoint was connected before.
        is_reconnection: bool,
    },
    /// The link to the peer dropped.
    PeerDisconnected,
    /// Local player chose a card.
    SelectCard(Card),
    /// Local player clicked ready.
    SetReady,
    /// A message from the peer.
    Received(Message),
    /// Host finished computing the outcome.
    BattleComputed(BattleOutcome),
    /// Periodic tick while waiting for the commit.
    SyncNudge,
    /// The ready timer elapsed.
    ReadyTimeoutElapsed {
        /// How long we waited.
        waited_secs: u64,
    },
    /// The rendering layer finished playing the story.
    PlaybackFinished,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send a message to the peer.
    Send(Message),
    /// Load artwork for a local card and send it as IMAGE_TRANSFER.
    SendImage {
        /// Card to send artwork for.
        card_id: CardId,
        /// Artwork reference.
        image_ref: String,
    },
    /// Arm the ready timer (timeout and sync nudges).
    StartReadyTimer,
    /// Disarm the ready timer.
    CancelReadyTimer,
    /// Host: run the outcome calculator and feed back `BattleComputed`.
    ComputeBattle {
        /// Our card.
        local: BattleCard,
        /// The peer's card.
        opponent: BattleCard,
    },
    /// Update the card collection after the battle.
    TransferCards {
        /// Card won from the peer.
        won: Option<Card>,
        /// Local card to remove.
        lost: Option<CardId>,
    },
    /// An event was ignored (debug-level).
    Ignored {
        /// Why.
        reason: String,
    },
    /// The peer's view disagrees with ours (warn-level).
    Mismatch {
        /// What disagreed.
        reason: String,
    },
}

/// A local command was not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Cards can only be chosen during card selection.
    NotInCardSelection {
        /// Phase at the time of the command.
        phase: BattlePhase,
    },
    /// Ready needs a selected card.
    NoCardSelected,
    /// The player already clicked ready.
    AlreadyReady,
    /// Playback can only finish while the battle is animating.
    NotAnimating {
        /// Phase at the time of the command.
        phase: BattlePhase,
    },
    /// The story or verdict has not fully arrived.
    StoryIncomplete {
        /// Segments still missing.
        missing: usize,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInCardSelection { phase } => {
                write!(f, "cannot select a card while {}", phase)
            }
            Self::NoCardSelected => write!(f, "select a card before clicking ready"),
            Self::AlreadyReady => write!(f, "already ready"),
            Self::NotAnimating { phase } => {
                write!(f, "no battle is playing (session is {})", phase)
            }
            Self::StoryIncomplete { missing } => {
                write!(f, "battle story incomplete ({} segments missing)", missing)
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Result of applying one event.
pub type Transition = (BattleSessionState, Vec<SessionAction>);

impl BattleSessionState {
    /// A fresh session at version 0, waiting for a peer.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            version: 0,
            phase: BattlePhase::WaitingForOpponent,
            local: PlayerSlot::default(),
            opponent: PlayerSlot::default(),
            is_host: false,
            status_message: None,
            story: Vec::new(),
            result: None,
            commit_fired: false,
            cards_transferred: false,
            battle_started: false,
            assembler: StoryAssembler::new(),
        }
    }

    /// All four commit conditions hold.
    pub fn can_proceed(&self) -> bool {
        self.local.is_ready
            && self.opponent.is_ready
            && self.local.data_complete
            && self.opponent.data_complete
    }

    /// We clicked ready and the commit has not happened yet.
    pub fn is_waiting_for_commit(&self) -> bool {
        self.local.is_ready && !self.commit_fired && self.phase == BattlePhase::CardSelection
    }

    /// Guest committed but part of the story or the verdict is missing.
    pub fn is_waiting_for_story(&self) -> bool {
        !self.is_host
            && self.commit_fired
            && matches!(
                self.phase,
                BattlePhase::ReadyToBattle | BattlePhase::BattleAnimating
            )
            && !self.story_complete()
    }

    /// Whether the story and verdict are fully held.
    pub fn story_complete(&self) -> bool {
        if self.is_host {
            !self.story.is_empty() && self.result.is_some()
        } else {
            self.assembler.is_complete() && self.result.is_some()
        }
    }

    /// Apply `event`, returning the next state and the actions to run.
    ///
    /// Local commands that are not allowed return an error and leave the
    /// state untouched. Everything else always succeeds.
    pub fn on_event(&self, event: SessionEvent) -> Result<Transition, CommandError> {
        if let SessionEvent::PeerConnected {
            is_host,
            is_reconnection,
        } = &event
        {
            if self.phase == BattlePhase::Disconnected {
                let fresh = Self::new(SessionId::new());
                return fresh.on_event(SessionEvent::PeerConnected {
                    is_host: *is_host,
                    is_reconnection: *is_reconnection,
                });
            }
        }

        let mut next = self.clone();
        let mut actions = Vec::new();
        let is_command = matches!(event, SessionEvent::SelectCard(_) | SessionEvent::SetReady);

        match event {
            SessionEvent::PeerConnected {
                is_host,
                is_reconnection,
            } => next.peer_connected(is_host, is_reconnection, &mut actions),
            SessionEvent::PeerDisconnected => next.peer_disconnected(&mut actions),
            SessionEvent::SelectCard(card) => next.select_card(card, &mut actions)?,
            SessionEvent::SetReady => next.set_ready(&mut actions)?,
            SessionEvent::Received(message) => next.received(message, &mut actions),
            SessionEvent::BattleComputed(outcome) => next.battle_computed(outcome, &mut actions),
            SessionEvent::SyncNudge => {
                if next.is_waiting_for_commit() || next.is_waiting_for_story() {
                    actions.push(SessionAction::Send(Message::StateSyncRequest(
                        StateSyncRequest {
                            session_id: next.session_id,
                        },
                    )));
                }
            }
            SessionEvent::ReadyTimeoutElapsed { waited_secs } => {
                next.ready_timeout(waited_secs, &mut actions)
            }
            SessionEvent::PlaybackFinished => next.playback_finished(&mut actions)?,
        }

        if self.commit_fired && !self.story_complete() && next.is_story_held() {
            actions.push(SessionAction::CancelReadyTimer);
        }

        // Accepted commands always count as a mutation, even a repeated pick.
        if is_command || next != *self {
            next.version = self.version + 1;
        }
        Ok((next, actions))
    }

    fn is_story_held(&self) -> bool {
        !self.is_host && self.phase == BattlePhase::BattleAnimating && self.story_complete()
    }

    fn peer_connected(&mut self, is_host: bool, is_reconnection: bool, actions: &mut Vec<SessionAction>) {
        match self.phase {
            BattlePhase::WaitingForOpponent => {
                self.phase = BattlePhase::CardSelection;
                self.is_host = is_host;
                self.status_message = None;
            }
            BattlePhase::CardSelection => {
                // Link replaced mid-selection; re-announce and resync.
                self.is_host = is_host;
                if let Some(card) = &self.local.card {
                    actions.push(SessionAction::Send(Message::CardSelected(
                        CardSelected::preview(&card.base),
                    )));
                }
                if is_reconnection || self.local.is_ready {
                    actions.push(SessionAction::Send(Message::StateSyncRequest(
                        StateSyncRequest {
                            session_id: self.session_id,
                        },
                    )));
                }
            }
            phase => actions.push(SessionAction::Ignored {
                reason: format!("peer connected while {}", phase),
            }),
        }
    }

    fn peer_disconnected(&mut self, actions: &mut Vec<SessionAction>) {
        if self.phase.is_terminal() {
            actions.push(SessionAction::Ignored {
                reason: format!("peer disconnected while {}", self.phase),
            });
            return;
        }
        self.phase = BattlePhase::Disconnected;
        self.status_message = Some("Opponent disconnected".into());
        actions.push(SessionAction::CancelReadyTimer);
    }

    fn select_card(&mut self, card: Card, actions: &mut Vec<SessionAction>) -> Result<(), CommandError> {
        if self.phase != BattlePhase::CardSelection {
            return Err(CommandError::NotInCardSelection { phase: self.phase });
        }
        if self.local.is_ready {
            return Err(CommandError::AlreadyReady);
        }

        actions.push(SessionAction::Send(Message::CardSelected(
            CardSelected::preview(&card),
        )));
        self.local.has_selected_card = true;
        self.local.preview = Some(card.preview());
        self.local.image = Some(card.id.clone());
        self.local.data_complete = false;
        self.local.card = Some(BattleCard::from_card(card));
        Ok(())
    }

    fn set_ready(&mut self, actions: &mut Vec<SessionAction>) -> Result<(), CommandError> {
        if self.phase != BattlePhase::CardSelection {
            return Err(CommandError::NotInCardSelection { phase: self.phase });
        }
        if self.local.is_ready {
            return Err(CommandError::AlreadyReady);
        }
        let card = match (&self.local.card, self.local.has_selected_card) {
            (Some(card), true) => card.base.clone(),
            _ => return Err(CommandError::NoCardSelected),
        };

        self.local.is_ready = true;
        push_full_card(&card, actions);
        actions.push(SessionAction::Send(Message::PlayerReady(PlayerReady {
            card_id: card.id.clone(),
        })));
        actions.push(SessionAction::StartReadyTimer);
        self.try_commit(actions);
        Ok(())
    }

    fn received(&mut self, message: Message, actions: &mut Vec<SessionAction>) {
        match message {
            Message::StateSyncRequest(_) => {
                actions.push(SessionAction::Send(Message::StateSyncResponse(
                    StateSyncResponse {
                        session_id: self.session_id,
                        has_selected_card: self.local.has_selected_card,
                        card: self.local.preview.clone(),
                        is_ready: self.local.is_ready,
                        holds_your_data: self.opponent.holds_full_data(),
                    },
                )));
                // A guest asking after our commit may be missing story parts.
                if self.is_host && self.commit_fired {
                    if let Some(result) = &self.result {
                        push_battle_stream(&self.story, result, actions);
                    }
                }
            }
            Message::StateSyncResponse(resp) => self.sync_response(resp, actions),
            Message::CardSelected(selected) => self.card_selected(selected, actions),
            Message::ImageTransfer(image) => {
                if !self.accepts_card_data() {
                    actions.push(ignored("image", self.phase));
                    return;
                }
                if let Some(id) = self.opponent.card_id() {
                    if *id != image.card_id {
                        actions.push(SessionAction::Ignored {
                            reason: format!("image for stale card {}", image.card_id),
                        });
                        return;
                    }
                }
                self.opponent.image = Some(image.card_id);
                self.ack_opponent_data(actions);
                self.try_commit(actions);
            }
            Message::ImageRequest(req) => match &self.local.card {
                Some(card) if card.base.id == req.card_id => {
                    actions.push(SessionAction::SendImage {
                        card_id: card.base.id.clone(),
                        image_ref: card.base.image_ref.clone(),
                    });
                }
                _ => actions.push(SessionAction::Ignored {
                    reason: format!("image request for unknown card {}", req.card_id),
                }),
            },
            Message::PlayerReady(_) => {
                if self.phase != BattlePhase::CardSelection {
                    actions.push(ignored("ready", self.phase));
                    return;
                }
                self.opponent.is_ready = true;
                self.try_commit(actions);
            }
            Message::ReadyAck(ack) => {
                if self.local.card_id() != Some(&ack.card_id) {
                    actions.push(SessionAction::Ignored {
                        reason: format!("ready ack for stale card {}", ack.card_id),
                    });
                    return;
                }
                self.local.data_complete = true;
                self.try_commit(actions);
            }
            Message::ReadyTimeout(timeout) => {
                if self.commit_fired || self.phase.is_terminal() {
                    actions.push(ignored("ready timeout", self.phase));
                    return;
                }
                self.phase = BattlePhase::Disconnected;
                self.local.is_ready = false;
                self.opponent.is_ready = false;
                self.status_message = Some(format!(
                    "Opponent stopped waiting after {}s",
                    timeout.waited_secs
                ));
                actions.push(SessionAction::CancelReadyTimer);
            }
            Message::RevealStart(reveal) => self.reveal_start(reveal, actions),
            Message::BattleStart(start) => {
                if self.is_host {
                    actions.push(ignored("battle start", self.phase));
                    return;
                }
                self.assembler.set_total(start.total_segments);
                self.battle_started = true;
                self.advance_guest();
            }
            Message::StorySegment(seg) => {
                if self.is_host {
                    actions.push(ignored("story segment", self.phase));
                    return;
                }
                if !self
                    .assembler
                    .insert(seg.index, seg.total, seg.segment.mirrored())
                {
                    actions.push(SessionAction::Ignored {
                        reason: format!("duplicate or out-of-range segment {}", seg.index),
                    });
                    return;
                }
                self.battle_started = true;
                self.advance_guest();
            }
            Message::BattleResult(verdict) => {
                if self.is_host {
                    actions.push(ignored("battle result", self.phase));
                    return;
                }
                self.assembler.set_total(verdict.total_segments);
                if self.result.is_none() {
                    self.result = Some(verdict.result.mirrored());
                }
                self.battle_started = true;
                self.advance_guest();
            }
            Message::Ping(_) | Message::Pong(_) => actions.push(SessionAction::Ignored {
                reason: "keepalive handled by node".into(),
            }),
        }
    }

    fn accepts_card_data(&self) -> bool {
        matches!(
            self.phase,
            BattlePhase::WaitingForOpponent | BattlePhase::CardSelection
        )
    }

    fn card_selected(&mut self, selected: CardSelected, actions: &mut Vec<SessionAction>) {
        if !self.accepts_card_data() {
            let held = match (selected.full_card(), &self.opponent.card) {
                (Some(card), Some(held)) if self.commit_fired && held.base == card => Some(card.id),
                _ => None,
            };
            match held {
                // Committed already, but the peer is still waiting on our ack.
                Some(card_id) => {
                    actions.push(SessionAction::Send(Message::ReadyAck(ReadyAck { card_id })))
                }
                None => actions.push(ignored("card selection", self.phase)),
            }
            return;
        }

        match selected.full_card() {
            None => {
                if self.opponent.card.is_some() {
                    actions.push(SessionAction::Ignored {
                        reason: "preview arrived after full card".into(),
                    });
                    return;
                }
                if self.opponent.preview.as_ref() != Some(&selected.card) {
                    self.opponent.has_selected_card = true;
                    self.opponent.preview = Some(selected.card);
                }
            }
            Some(card) => {
                let same_card = self
                    .opponent
                    .card
                    .as_ref()
                    .is_some_and(|held| held.base == card);
                if same_card {
                    if self.opponent.data_complete {
                        // Peer re-sent its card, so it may have missed our ack.
                        actions.push(SessionAction::Send(Message::ReadyAck(ReadyAck {
                            card_id: card.id.clone(),
                        })));
                    }
                    return;
                }

                self.opponent.has_selected_card = true;
                self.opponent.preview = Some(selected.card);
                self.opponent.data_complete = false;
                let card_id = card.id.clone();
                self.opponent.card = Some(BattleCard::from_card(card));
                if !self.opponent.has_image() {
                    actions.push(SessionAction::Send(Message::ImageRequest(ImageRequest {
                        card_id,
                    })));
                }
                self.ack_opponent_data(actions);
                self.try_commit(actions);
            }
        }
    }

    fn sync_response(&mut self, resp: StateSyncResponse, actions: &mut Vec<SessionAction>) {
        if !self.accepts_card_data() {
            actions.push(ignored("state sync", self.phase));
            return;
        }

        if let Some(preview) = resp.card {
            if self.opponent.card.is_none() && self.opponent.preview.as_ref() != Some(&preview) {
                self.opponent.has_selected_card = true;
                self.opponent.preview = Some(preview);
            }
        }
        if resp.is_ready && self.phase == BattlePhase::CardSelection {
            self.opponent.is_ready = true;
        }
        // No ack yet: push again so the peer re-acks a card it already holds.
        if self.local.is_ready && (!resp.holds_your_data || !self.local.data_complete) {
            if let Some(card) = &self.local.card {
                push_full_card(&card.base, actions);
            }
        }
        self.try_commit(actions);
    }

    /// Send READY_ACK once all of the peer's card data is held.
    fn ack_opponent_data(&mut self, actions: &mut Vec<SessionAction>) {
        if self.opponent.data_complete || !self.opponent.holds_full_data() {
            return;
        }
        if let Some(card_id) = self.opponent.card_id().cloned() {
            actions.push(SessionAction::Send(Message::ReadyAck(ReadyAck { card_id })));
            self.opponent.data_complete = true;
        }
    }

    fn try_commit(&mut self, actions: &mut Vec<SessionAction>) {
        if self.commit_fired || self.phase != BattlePhase::CardSelection || !self.can_proceed() {
            return;
        }
        self.commit_fired = true;
        self.phase = BattlePhase::ReadyToBattle;
        self.status_message = None;

        if self.is_host {
            actions.push(SessionAction::CancelReadyTimer);
            if let (Some(local), Some(opponent)) = (&self.local.card, &self.opponent.card) {
                actions.push(SessionAction::ComputeBattle {
                    local: local.clone(),
                    opponent: opponent.clone(),
                });
            }
        } else {
            self.advance_guest();
            // Keep the timer armed until the story is held.
            if self.is_story_held() {
                actions.push(SessionAction::CancelReadyTimer);
            } else {
                actions.push(SessionAction::StartReadyTimer);
            }
        }
    }

    /// Move the guest into playback once committed and the stream started.
    fn advance_guest(&mut self) {
        if !self.commit_fired {
            return;
        }
        if self.phase == BattlePhase::ReadyToBattle && self.battle_started {
            self.phase = BattlePhase::BattleAnimating;
        }
        if self.phase == BattlePhase::BattleAnimating {
            self.story = self.assembler.ordered();
        }
    }

    fn reveal_start(&mut self, reveal: RevealStart, actions: &mut Vec<SessionAction>) {
        if self.is_host {
            actions.push(ignored("reveal", self.phase));
            return;
        }
        let host_card = self.opponent.card_id();
        let guest_card = self.local.card_id();
        if host_card != Some(&reveal.host_card_id) || guest_card != Some(&reveal.guest_card_id) {
            actions.push(SessionAction::Mismatch {
                reason: format!(
                    "reveal {} vs {} does not match local view {:?} vs {:?}",
                    reveal.host_card_id, reveal.guest_card_id, host_card, guest_card
                ),
            });
        }
    }

    fn battle_computed(&mut self, outcome: BattleOutcome, actions: &mut Vec<SessionAction>) {
        if !self.is_host || self.phase != BattlePhase::ReadyToBattle || self.result.is_some() {
            actions.push(ignored("computed battle", self.phase));
            return;
        }
        let (Some(host_card), Some(guest_card)) = (self.local.card_id(), self.opponent.card_id())
        else {
            return;
        };

        actions.push(SessionAction::Send(Message::RevealStart(RevealStart {
            host_card_id: host_card.clone(),
            guest_card_id: guest_card.clone(),
        })));
        push_battle_stream(&outcome.segments, &outcome.result, actions);

        self.story = outcome.segments;
        self.result = Some(outcome.result);
        self.phase = BattlePhase::BattleAnimating;
    }

    fn ready_timeout(&mut self, waited_secs: u64, actions: &mut Vec<SessionAction>) {
        if self.is_waiting_for_story() {
            self.phase = BattlePhase::Disconnected;
            self.status_message = Some(format!(
                "Battle story did not arrive within {}s",
                waited_secs
            ));
            return;
        }
        if !self.is_waiting_for_commit() {
            actions.push(ignored("ready timeout", self.phase));
            return;
        }
        self.phase = BattlePhase::Disconnected;
        self.local.is_ready = false;
        self.opponent.is_ready = false;
        self.status_message = Some(format!(
            "Opponent did not get ready within {}s",
            waited_secs
        ));
        actions.push(SessionAction::Send(Message::ReadyTimeout(ReadyTimeout {
            waited_secs,
        })));
    }

    fn playback_finished(&mut self, actions: &mut Vec<SessionAction>) -> Result<(), CommandError> {
        if self.phase != BattlePhase::BattleAnimating {
            return Err(CommandError::NotAnimating { phase: self.phase });
        }
        if !self.story_complete() {
            let mut missing = self.assembler.missing().len();
            if self.result.is_none() {
                missing += 1;
            }
            return Err(CommandError::StoryIncomplete {
                missing: missing.max(1),
            });
        }

        self.phase = BattlePhase::BattleComplete;
        if self.cards_transferred {
            return Ok(());
        }
        let Some(result) = &self.result else {
            return Ok(());
        };

        let local_id = self.local.card_id().cloned();
        let (won, lost) = match result.winner_is_local {
            Some(true) => (self.opponent.card.as_ref().map(|c| c.base.clone()), None),
            Some(false) | None => (None, local_id),
        };
        self.status_message = Some(match result.winner_is_local {
            Some(true) => "You won!".to_string(),
            Some(false) => "You lost.".to_string(),
            None => "It's a draw.".to_string(),
        });
        self.cards_transferred = true;
        actions.push(SessionAction::TransferCards { won, lost });
        Ok(())
    }
}

fn push_battle_stream(
    segments: &[BattleStorySegment],
    result: &BattleResult,
    actions: &mut Vec<SessionAction>,
) {
    let total = segments.len() as u32;
    actions.push(SessionAction::Send(Message::BattleStart(BattleStart {
        total_segments: total,
    })));
    for (index, segment) in segments.iter().enumerate() {
        actions.push(SessionAction::Send(Message::StorySegment(StorySegment {
            index: index as u32,
            total,
            segment: segment.clone(),
        })));
    }
    actions.push(SessionAction::Send(Message::BattleResult(BattleVerdict {
        result: result.clone(),
        total_segments: total,
    })));
}

fn push_full_card(card: &Card, actions: &mut Vec<SessionAction>) {
    actions.push(SessionAction::Send(Message::CardSelected(CardSelected::full(
        card,
    ))));
    actions.push(SessionAction::SendImage {
        card_id: card.id.clone(),
        image_ref: card.image_ref.clone(),
    });
}

fn ignored(what: &str, phase: BattlePhase) -> SessionAction {
    SessionAction::Ignored {
        reason: format!("{} ignored while {}", what, phase),
    }
}
