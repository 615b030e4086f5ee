// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `missive status` command implementation.
//!
//! Reads row counts straight from the database, so it works whether or not
//! an engine is running against it.

use std::io::IsTerminal;

use missive_config::MissiveConfig;
use missive_core::MissiveError;
use missive_storage::StorageStats;
use serde::Serialize;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub database_path: String,
    pub jobs: i64,
    pub pending_messages: i64,
    pub conversations: i64,
    pub expiring_messages: i64,
}

impl StatusResponse {
    fn new(database_path: &str, stats: StorageStats) -> Self {
        Self {
            database_path: database_path.to_string(),
            jobs: stats.jobs,
            pending_messages: stats.pending_messages,
            conversations: stats.conversations,
            expiring_messages: stats.expiring_messages,
        }
    }
}

/// Run the `missive status` command.
pub async fn run_status(
    config: &MissiveConfig,
    json: bool,
    plain: bool,
) -> Result<(), MissiveError> {
    let storage = crate::open_storage(config).await?;
    let stats = storage.stats().await?;
    storage.close().await?;

    let status = StatusResponse::new(&config.storage.database_path, stats);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&status, use_color);
    }
    Ok(())
}

fn print_status(status: &StatusResponse, use_color: bool) {
    println!();
    println!("  missive status");
    println!("  {}", "-".repeat(35));
    println!("    Database:   {}", status.database_path);

    let backlog = status.jobs + status.pending_messages;
    if use_color {
        use colored::Colorize;
        let jobs = status.jobs.to_string();
        let jobs = if backlog > 0 { jobs.yellow() } else { jobs.green() };
        println!("    Jobs:       {jobs}");
    } else {
        println!("    Jobs:       {}", status.jobs);
    }
    println!("    Pending:    {}", status.pending_messages);
    println!("    Contacts:   {}", status.conversations);
    println!("    Expiring:   {}", status.expiring_messages);
    println!();
}
