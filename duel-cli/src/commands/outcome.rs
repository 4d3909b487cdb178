//! Compute a battle offline.

use anyhow::Result;
use duel_core::{compute_battle, BattleCard};

use crate::deck;

/// Run the outcome command.
pub fn run(local: &str, opponent: &str, seed: u64) -> Result<()> {
    let local = BattleCard::from_card(deck::find(local)?);
    let opponent = BattleCard::from_card(deck::find(opponent)?);
    let outcome = compute_battle(&local, &opponent, seed);

    println!("=== duel-sim outcome (seed {}) ===", seed);
    println!();
    for segment in &outcome.segments {
        println!("  {}", segment.text);
    }
    println!();
    println!("Rounds:  {}", outcome.rounds_played);
    println!(
        "Health:  {} {} / {} {}",
        local.base.name,
        outcome.result.local_final_health,
        opponent.base.name,
        outcome.result.opponent_final_health
    );
    let verdict = match outcome.result.winner_is_local {
        Some(true) => format!("{} wins", local.base.name),
        Some(false) => format!("{} wins", opponent.base.name),
        None => "Draw".to_string(),
    };
    println!("Verdict: {}", verdict);
    Ok(())
}
