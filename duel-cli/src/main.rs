//! # duel-sim
//!
//! Simulator for Duelink battles.
//!
//! ## Commands
//!
//! - `battle`: Run two peers over an in-memory link and play one battle
//! - `outcome`: Compute a battle offline, without any peers
//! - `deck`: List the demo cards
//!
//! ## Example
//!
//! ```bash
//! # A clean battle
//! duel-sim battle --host-card ember-drake --guest-card tide-caller
//!
//! # A hostile link: 30% loss, 10% duplication, one connect collision
//! duel-sim battle --loss 0.3 --duplicate 0.1 --collisions 1 --seed 42
//!
//! # Same seed, same story
//! duel-sim outcome --seed 42
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod deck;

use commands::{battle, outcome};
use duel_client::DuelConfig;

/// Simulator for Duelink battles.
#[derive(Parser, Debug)]
#[command(name = "duel-sim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run two peers over an in-memory link and play one battle
    Battle {
        /// Card played by the host
        #[arg(long, default_value = "ember-drake")]
        host_card: String,

        /// Card played by the guest
        #[arg(long, default_value = "tide-caller")]
        guest_card: String,

        /// Seed for the battle and the link (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Probability that a payload is dropped
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Probability that a payload is delivered twice
        #[arg(long, default_value = "0.0")]
        duplicate: f64,

        /// Probability that a payload arrives after the next one
        #[arg(long, default_value = "0.0")]
        reorder: f64,

        /// Number of initial connection attempts that collide
        #[arg(long, default_value = "0")]
        collisions: u32,
    },

    /// Compute a battle offline
    Outcome {
        /// Local card
        #[arg(long, default_value = "ember-drake")]
        local: String,

        /// Opponent card
        #[arg(long, default_value = "tide-caller")]
        opponent: String,

        /// Battle seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// List the demo cards
    Deck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => DuelConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DuelConfig::default(),
    };

    match cli.command {
        Commands::Battle {
            host_card,
            guest_card,
            seed,
            loss,
            duplicate,
            reorder,
            collisions,
        } => {
            if [loss, duplicate, reorder]
                .iter()
                .any(|p| !(0.0..=1.0).contains(p))
            {
                anyhow::bail!("--loss, --duplicate and --reorder must be between 0 and 1");
            }
            let options = battle::Options {
                host_card,
                guest_card,
                seed: seed.unwrap_or_else(rand::random),
                loss,
                duplicate,
                reorder,
                collisions,
            };
            battle::run(config, options).await?;
        }
        Commands::Outcome {
            local,
            opponent,
            seed,
        } => {
            outcome::run(&local, &opponent, seed)?;
        }
        Commands::Deck => {
            for card in deck::cards() {
                println!(
                    "{:<14} {:<16} {:<10} atk {:>3}  hp {:>3}",
                    card.id.as_str(),
                    card.name,
                    format!("{:?}", card.rarity),
                    card.base_attack,
                    card.base_health
                );
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
