//! Battle outcome calculation.
//!
//! [`compute_battle`] is a pure function of the two cards and a seed. Only
//! the host calls it, once per battle; its output is streamed verbatim to
//! the guest, which never recomputes it (two independent RNG draws would
//! diverge).

use duel_types::{BattleResult, BattleStorySegment};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::card::BattleCard;

/// Fewest rounds a battle can last.
pub const MIN_ROUNDS: u32 = 3;
/// Most rounds a battle can last.
pub const MAX_ROUNDS: u32 = 5;

const MIN_ROLL: f64 = 0.8;
const MAX_ROLL: f64 = 1.2;

/// Story and verdict of one battle, from the perspective of `local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleOutcome {
    /// Narration in playback order.
    pub segments: Vec<BattleStorySegment>,
    /// Final verdict.
    pub result: BattleResult,
    /// Rounds actually fought (may be fewer than drawn on a knockout).
    pub rounds_played: u32,
}

/// Run a battle between `local` and `opponent`.
///
/// Each round both cards strike simultaneously for
/// `round(attack * uniform(0.8, 1.2))`. The battle ends after the drawn
/// number of rounds or as soon as either card drops to zero health.
pub fn compute_battle(local: &BattleCard, opponent: &BattleCard, seed: u64) -> BattleOutcome {
    let mut rng = StdRng::seed_from_u64(seed);
    let rounds = rng.gen_range(MIN_ROUNDS..=MAX_ROUNDS);

    let local_name = &local.base.name;
    let opponent_name = &opponent.base.name;
    let mut local_health = local.current_health;
    let mut opponent_health = opponent.current_health;

    let mut segments = vec![BattleStorySegment {
        text: format!(
            "{} ({}/{}) faces {} ({}/{})!",
            local_name,
            local.effective_attack,
            local.current_health,
            opponent_name,
            opponent.effective_attack,
            opponent.current_health
        ),
        is_local_action: true,
        damage_dealt: None,
    }];

    let mut rounds_played = 0;
    for round in 1..=rounds {
        rounds_played = round;
        let local_damage = roll_damage(&mut rng, local.effective_attack);
        let opponent_damage = roll_damage(&mut rng, opponent.effective_attack);
        opponent_health = opponent_health.saturating_sub(local_damage);
        local_health = local_health.saturating_sub(opponent_damage);

        segments.push(BattleStorySegment {
            text: format!(
                "Round {}: {} strikes {} for {} damage.",
                round, local_name, opponent_name, local_damage
            ),
            is_local_action: true,
            damage_dealt: Some(local_damage),
        });
        segments.push(BattleStorySegment {
            text: format!(
                "Round {}: {} strikes back at {} for {} damage.",
                round, opponent_name, local_name, opponent_damage
            ),
            is_local_action: false,
            damage_dealt: Some(opponent_damage),
        });

        if local_health <= 0 || opponent_health <= 0 {
            break;
        }
    }

    let winner_is_local = if local_health <= 0 && opponent_health <= 0 {
        None
    } else if local_health > opponent_health {
        Some(true)
    } else if opponent_health > local_health {
        Some(false)
    } else {
        None
    };

    let closing = match winner_is_local {
        Some(true) => BattleStorySegment {
            text: format!(
                "{} wins with {} health remaining!",
                local_name,
                local_health.max(0)
            ),
            is_local_action: true,
            damage_dealt: None,
        },
        Some(false) => BattleStorySegment {
            text: format!(
                "{} wins with {} health remaining!",
                opponent_name,
                opponent_health.max(0)
            ),
            is_local_action: false,
            damage_dealt: None,
        },
        None if local_health <= 0 => BattleStorySegment {
            text: "Both cards fall at once. It's a draw!".to_string(),
            is_local_action: true,
            damage_dealt: None,
        },
        None => BattleStorySegment {
            text: "Neither card yields. It's a draw!".to_string(),
            is_local_action: true,
            damage_dealt: None,
        },
    };
    segments.push(closing);

    let card_transferred = match winner_is_local {
        Some(true) => Some(opponent.base.id.clone()),
        Some(false) => Some(local.base.id.clone()),
        None => None,
    };

    let story_text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    BattleOutcome {
        segments,
        result: BattleResult {
            is_draw: winner_is_local.is_none(),
            winner_is_local,
            local_final_health: local_health,
            opponent_final_health: opponent_health,
            story_text,
            card_transferred,
        },
        rounds_played,
    }
}

fn roll_damage(rng: &mut StdRng, attack: i32) -> i32 {
    let roll: f64 = rng.gen_range(MIN_ROLL..=MAX_ROLL);
    (f64::from(attack.max(0)) * roll).round() as i32
}
