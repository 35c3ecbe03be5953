//! # daydream CLI
//!
//! Batch entry point, run once a day by a scheduler.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `daydream generate [DATE]` | Generate and publish the challenges for DATE (default: today) |
//! | `daydream generate --dry-run` | Generate without touching the CDN |
//! | `daydream index` | Compare `days.json` at the origin with the edge-cached copy |
//!
//! ## Examples
//!
//! ```bash
//! daydream --config ./config/daydream.toml generate
//! daydream generate 2024-03-04
//! RUST_LOG=daydream=debug daydream generate --dry-run
//! ```

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use daydream::{config, job};

/// daydream: daily AI-illustrated word puzzles.
///
/// Credentials come from the environment (`OPENAI_API_KEY`,
/// `CDN_ACCESS_KEY_ID`, `CDN_SECRET_ACCESS_KEY`); everything else from the
/// config file. See `config/daydream.example.toml`.
#[derive(Parser)]
#[command(name = "daydream", version, about = "Generate and publish daily word puzzle challenges")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/daydream.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the four challenges for a date and publish them.
    ///
    /// Regenerating a date that already exists keeps its id and replaces
    /// its record. `today.json` is only updated when DATE is today.
    Generate {
        /// Target date (YYYY-MM-DD). Defaults to today, local time.
        #[arg(value_parser = parse_date_arg)]
        date: Option<NaiveDate>,

        /// Keep uploads in memory and write the day record to the work
        /// directory. Still calls the generative API.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the day index at the origin and flag entries the CDN cache
    /// has not picked up yet.
    Index,
}

/// Parse a strict `YYYY-MM-DD` date.
fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(format!("invalid date '{}': expected YYYY-MM-DD", s));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {} (expected YYYY-MM-DD)", s, e))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("daydream=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Generate { date, dry_run } => {
            let outcome = job::run_generate(&cfg, date, dry_run).await?;
            println!(
                "Generated {} (id {}, {}{}) after {} attempt(s).",
                outcome.date,
                outcome.id,
                if outcome.overwrite { "overwrite" } else { "new" },
                if outcome.published_today {
                    ", published to today.json"
                } else {
                    ""
                },
                outcome.attempts
            );
        }
        Commands::Index => {
            job::run_index(&cfg).await?;
        }
    }

    Ok(())
}
