// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `missive jobs` command implementation.

use chrono::{DateTime, Utc};
use missive_config::MissiveConfig;
use missive_core::{Job, JobStore, MissiveError, Timestamp};

/// Run the `missive jobs` command.
pub async fn run_jobs(
    config: &MissiveConfig,
    conversation: Option<&str>,
    json: bool,
) -> Result<(), MissiveError> {
    let storage = crate::open_storage(config).await?;
    let jobs = filter_jobs(storage.load_jobs().await?, conversation);
    storage.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("no persisted jobs");
        return Ok(());
    }
    println!(
        "{:<36}  {:<20}  {:<18}  {:>8}  {:<20}",
        "ID", "CONVERSATION", "KIND", "ATTEMPTS", "RETRY AT"
    );
    for job in &jobs {
        println!(
            "{:<36}  {:<20}  {:<18}  {:>8}  {:<20}",
            job.id,
            job.conversation_id,
            job.kind().to_string(),
            job.attempts,
            job.retry_at.map(format_ts).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn filter_jobs(jobs: Vec<Job>, conversation: Option<&str>) -> Vec<Job> {
    match conversation {
        Some(id) => jobs
            .into_iter()
            .filter(|job| job.conversation_id.as_str() == id)
            .collect(),
        None => jobs,
    }
}

fn format_ts(ms: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
