// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ferry - cross-platform message relay.
//!
//! Operator entry point: inspect and administer sessions, forwarding pairs,
//! and correlation history in the configured store.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ferry_config::model::FerryConfig;
use ferry_core::FerryError;

mod context;
mod pairs;
mod sessions;
mod sweep;

use context::Ops;

/// Ferry - cross-platform message relay.
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colors.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// List sessions with health and utilization.
    Sessions,
    /// Show one session in detail, including its worker groups.
    Status { session: String },
    /// Register a new session. It takes pairs once a probe verifies it.
    Register {
        name: String,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Mark an unauthorized session as re-authenticated.
    Reauth { session: String },
    /// Remove a session.
    Remove {
        session: String,
        /// Reassign or orphan its pairs instead of refusing.
        #[arg(long)]
        force: bool,
    },
    /// List forwarding pairs.
    Pairs {
        /// Only pairs waiting for operator attention.
        #[arg(long)]
        orphaned: bool,
    },
    /// Create a forwarding pair.
    AddPair {
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        relay: String,
        #[arg(long)]
        destination: String,
    },
    /// Assign a pair to the best available session.
    Assign { pair_id: i64 },
    /// Move pairs to a session, all or none.
    Reassign {
        target: String,
        #[arg(required = true)]
        pair_ids: Vec<i64>,
    },
    /// Purge correlation records past the retention window.
    Sweep,
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub color: bool,
}

impl Output {
    fn from_cli(cli: &Cli) -> Self {
        use std::io::IsTerminal;
        Self {
            json: cli.json,
            color: !cli.plain && std::io::stdout().is_terminal(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => ferry_config::load_and_validate_path(path),
        None => ferry_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            ferry_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging.level);

    let output = Output::from_cli(&cli);
    let Some(command) = cli.command else {
        println!("ferry: use --help for available commands");
        return;
    };

    if let Err(e) = run(command, config, output).await {
        eprintln!("ferry: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: FerryConfig, out: Output) -> Result<(), FerryError> {
    let ops = Ops::open(config).await?;
    let result = match command {
        Commands::Sessions => sessions::run_sessions(&ops, out).await,
        Commands::Status { session } => sessions::run_status(&ops, &session, out).await,
        Commands::Register {
            name,
            capacity,
            priority,
        } => sessions::run_register(&ops, &name, capacity, priority, out).await,
        Commands::Reauth { session } => sessions::run_reauth(&ops, &session, out).await,
        Commands::Remove { session, force } => {
            sessions::run_remove(&ops, &session, force, out).await
        }
        Commands::Pairs { orphaned } => pairs::run_pairs(&ops, orphaned, out).await,
        Commands::AddPair {
            name,
            source,
            relay,
            destination,
        } => pairs::run_add_pair(&ops, &name, &source, &relay, &destination, out).await,
        Commands::Assign { pair_id } => pairs::run_assign(&ops, pair_id, out).await,
        Commands::Reassign { target, pair_ids } => {
            pairs::run_reassign(&ops, &target, &pair_ids, out).await
        }
        Commands::Sweep => sweep::run_sweep(&ops, out).await,
    };
    ops.close().await?;
    result
}

/// Install the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ferry={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn reassign_requires_pair_ids() {
        assert!(Cli::try_parse_from(["ferry", "reassign", "s1"]).is_err());
        let cli = Cli::try_parse_from(["ferry", "--json", "reassign", "s1", "3", "4"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Some(Commands::Reassign { target, pair_ids }) => {
                assert_eq!(target, "s1");
                assert_eq!(pair_ids, vec![3, 4]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn register_options_are_optional() {
        let cli = Cli::try_parse_from(["ferry", "register", "main", "--capacity", "5"]).unwrap();
        match cli.command {
            Some(Commands::Register {
                name,
                capacity,
                priority,
            }) => {
                assert_eq!(name, "main");
                assert_eq!(capacity, Some(5));
                assert_eq!(priority, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
