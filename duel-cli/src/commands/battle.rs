//! Play one battle between two in-process peers.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use duel_client::{
    loopback_pair, BattleSession, DuelConfig, DuelNode, LinkConditions, LoopbackTransport,
    MemoryCardStore,
};
use duel_core::{BattlePhase, BattleSessionState};

use crate::deck;

/// Battle command options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Host's card id.
    pub host_card: String,
    /// Guest's card id.
    pub guest_card: String,
    /// Seed for the battle and the link.
    pub seed: u64,
    /// Payload loss probability.
    pub loss: f64,
    /// Payload duplication probability.
    pub duplicate: f64,
    /// Payload reordering probability.
    pub reorder: f64,
    /// Forced connect collisions.
    pub collisions: u32,
}

/// Run the battle command.
pub async fn run(mut config: DuelConfig, options: Options) -> Result<()> {
    let host_card = deck::find(&options.host_card)?;
    let guest_card = deck::find(&options.guest_card)?;
    config.session.battle_seed = Some(options.seed);

    let conditions = LinkConditions {
        loss: options.loss,
        duplicate: options.duplicate,
        reorder: options.reorder,
        collisions: options.collisions,
        seed: options.seed,
    };
    let ((host_link, host_events), (guest_link, guest_events)) =
        loopback_pair("host", "guest", conditions);

    let host_store = Arc::new(MemoryCardStore::new());
    host_store.insert(host_card.clone(), deck::artwork(&host_card));
    let guest_store = Arc::new(MemoryCardStore::new());
    guest_store.insert(guest_card.clone(), deck::artwork(&guest_card));

    let mut host_config = config.clone();
    host_config.session.local_name = "Host".to_string();
    let mut guest_config = config.clone();
    guest_config.session.local_name = "Guest".to_string();

    let host = Arc::new(DuelNode::new(host_link, host_store.clone(), &host_config));
    let guest = Arc::new(DuelNode::new(guest_link, guest_store.clone(), &guest_config));
    Arc::clone(&host).spawn(host_events);
    Arc::clone(&guest).spawn(guest_events);

    println!("=== duel-sim battle (seed {}) ===", options.seed);
    println!(
        "Link: {:.0}% loss, {:.0}% duplication, {:.0}% reordering, {} forced collisions",
        options.loss * 100.0,
        options.duplicate * 100.0,
        options.reorder * 100.0,
        options.collisions
    );
    println!();

    host.start_advertising().await?;
    guest.start_discovery().await?;
    guest.connect(&host.local_endpoint()).await?;

    // Collisions back off before the retry, so allow for every attempt.
    let connect_wait = config.connection.collision_backoff()
        * (config.connection.max_connect_attempts + 1)
        + Duration::from_secs(5);
    wait_for_phase(host.session(), connect_wait, |s| {
        s.phase == BattlePhase::CardSelection
    })
    .await
    .context("host never saw the guest connect")?;
    wait_for_phase(guest.session(), connect_wait, |s| {
        s.phase == BattlePhase::CardSelection
    })
    .await
    .context("guest never connected")?;
    tracing::info!(
        "Connected after {} attempt(s)",
        options.collisions.min(config.connection.max_connect_attempts) + 1
    );

    host.session().select_card(host_card.clone()).await?;
    guest.session().select_card(guest_card.clone()).await?;
    host.session().set_ready().await?;
    guest.session().set_ready().await?;

    let battle_wait = config.session.ready_timeout() + Duration::from_secs(30);
    let ready = |s: &BattleSessionState| {
        (s.phase == BattlePhase::BattleAnimating && s.story_complete()) || s.phase.is_terminal()
    };
    let host_state = wait_for_phase(host.session(), battle_wait, ready)
        .await
        .context("host battle did not finish")?;
    let guest_state = wait_for_phase(guest.session(), battle_wait, ready)
        .await
        .context("guest battle did not finish")?;

    if host_state.phase == BattlePhase::Disconnected || guest_state.phase == BattlePhase::Disconnected
    {
        let notice = host_state
            .status_message
            .clone()
            .or_else(|| guest_state.status_message.clone())
            .unwrap_or_else(|| "peer lost".to_string());
        anyhow::bail!("battle aborted: {}", notice);
    }

    println!("{} vs {}", host_card.name, guest_card.name);
    println!();
    for segment in &host_state.story {
        println!("  {}", segment.text);
    }
    println!();

    host.session().playback_finished().await?;
    guest.session().playback_finished().await?;

    let verdict = match host_state.result.as_ref().and_then(|r| r.winner_is_local) {
        Some(true) => format!("Host wins with {}", host_card.name),
        Some(false) => format!("Guest wins with {}", guest_card.name),
        None => "Draw, both cards are lost".to_string(),
    };
    println!("Verdict: {}", verdict);
    if let Some(result) = &guest_state.result {
        println!(
            "Guest view: {} hp left, opponent {} hp",
            result.local_final_health, result.opponent_final_health
        );
    }
    println!();
    print_collection("Host", &host_store);
    print_collection("Guest", &guest_store);

    if let Some(rtt) = host.rtt() {
        tracing::debug!("Host RTT: {:?}", rtt);
    }

    host.stop_all().await;
    guest.stop_all().await;
    Ok(())
}

async fn wait_for_phase(
    session: &BattleSession<LoopbackTransport>,
    limit: Duration,
    done: impl Fn(&BattleSessionState) -> bool,
) -> Result<Arc<BattleSessionState>> {
    let mut rx = session.subscribe();
    let state = tokio::time::timeout(limit, rx.wait_for(|s| done(s)))
        .await
        .context("timed out")?
        .context("session closed")?;
    Ok(Arc::clone(&state))
}

fn print_collection(label: &str, store: &MemoryCardStore) {
    let names: Vec<String> = store.cards().into_iter().map(|c| c.name).collect();
    if names.is_empty() {
        println!("{} collection: (empty)", label);
    } else {
        println!("{} collection: {}", label, names.join(", "));
    }
}
