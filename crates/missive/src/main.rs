// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Missive - outgoing delivery pipeline and receipt reconciliation.
//!
//! Operator CLI that inspects and maintains a Missive database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod doctor;
mod jobs;
mod status;
mod sweep;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use missive_config::MissiveConfig;
use missive_core::MissiveError;
use missive_storage::SqliteStorage;

/// Missive - outgoing delivery pipeline and receipt reconciliation.
#[derive(Parser, Debug)]
#[command(name = "missive", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show job, pending message and expiring message counts.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List persisted outgoing jobs.
    Jobs {
        /// Only jobs for this conversation.
        #[arg(long)]
        conversation: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete every message whose disappearing timer has run out.
    Sweep,
    /// Check configuration, database connectivity and integrity.
    Doctor,
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => missive_config::load_and_validate_path(path),
        None => missive_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            missive_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.client.log_level);

    let result = match cli.command {
        Some(Commands::Status { json }) => status::run_status(&config, json, cli.plain).await,
        Some(Commands::Jobs { conversation, json }) => {
            jobs::run_jobs(&config, conversation.as_deref(), json).await
        }
        Some(Commands::Sweep) => sweep::run_sweep(&config).await,
        Some(Commands::Doctor) => doctor::run_doctor(&config, cli.plain).await,
        Some(Commands::Config) => print_config(&config),
        None => {
            println!("missive: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Open and migrate the configured database.
pub(crate) async fn open_storage(config: &MissiveConfig) -> Result<SqliteStorage, MissiveError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(storage)
}

fn print_config(config: &MissiveConfig) -> Result<(), MissiveError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| MissiveError::Config(format!("failed to render configuration: {e}")))?;
    print!("{rendered}");
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("missive={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
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
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["missive", "jobs", "--conversation", "c1"]).unwrap();
        match cli.command {
            Some(Commands::Jobs { conversation, json }) => {
                assert_eq!(conversation.as_deref(), Some("c1"));
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["missive", "status", "--json", "--plain"]).unwrap();
        assert!(cli.plain);
        assert!(matches!(cli.command, Some(Commands::Status { json: true })));
    }

    #[test]
    fn default_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&MissiveConfig::default()).unwrap();
        assert!(rendered.contains("[queue]"));
        assert!(rendered.contains("read_receipts"));
        let back = missive_config::load_and_validate_str(&rendered).unwrap();
        assert_eq!(back.expiry.max_timer_delay_ms, MissiveConfig::default().expiry.max_timer_delay_ms);
    }
}
