// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `missive doctor` command implementation.
//!
//! Runs diagnostic checks against the configuration and the database.

use std::collections::HashSet;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use missive_config::MissiveConfig;
use missive_core::{JobStore, MissiveError};
use missive_storage::SqliteStorage;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `missive doctor` command.
pub async fn run_doctor(config: &MissiveConfig, plain: bool) -> Result<(), MissiveError> {
    let use_color = !plain && std::io::stdout().is_terminal();
    let mut results = vec![check_config(config)];

    let db_path = config.storage.database_path.as_str();
    if std::path::Path::new(db_path).exists() {
        let start = Instant::now();
        match crate::open_storage(config).await {
            Ok(storage) => {
                results.push(CheckResult::new("Database", CheckStatus::Pass, "connected", start));
                results.push(check_db_integrity(&storage).await);
                results.push(check_orphaned_jobs(&storage).await);
                storage.close().await?;
            }
            Err(e) => results.push(CheckResult::new(
                "Database",
                CheckStatus::Fail,
                format!("open failed: {e}"),
                start,
            )),
        }
    } else {
        results.push(CheckResult::new(
            "Database",
            CheckStatus::Warn,
            format!("not found: {db_path} (will be created on first run)"),
            Instant::now(),
        ));
    }
    results.push(check_memory_baseline());

    println!();
    println!("  missive doctor");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in &results {
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("{}", render_line(result, use_color));
    }
    println!();
    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(())
}

fn render_line(result: &CheckResult, use_color: bool) -> String {
    let duration_ms = result.duration.as_millis();
    if use_color {
        use colored::Colorize;
        let (symbol, message) = match result.status {
            CheckStatus::Pass => ("✓".green(), result.message.normal()),
            CheckStatus::Warn => ("!".yellow(), result.message.yellow()),
            CheckStatus::Fail => ("✗".red(), result.message.red()),
        };
        format!("    {symbol} {:<20} {message} ({duration_ms}ms)", result.name)
    } else {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => "[FAIL]",
        };
        format!(
            "    {tag} {:<20} {} ({duration_ms}ms)",
            result.name, result.message
        )
    }
}

fn check_config(config: &MissiveConfig) -> CheckResult {
    let start = Instant::now();
    match missive_config::validation::validate_config(config) {
        Ok(()) => CheckResult::new("Configuration", CheckStatus::Pass, "valid", start),
        Err(errors) => CheckResult::new(
            "Configuration",
            CheckStatus::Fail,
            format!("{} error(s)", errors.len()),
            start,
        ),
    }
}

async fn check_db_integrity(storage: &SqliteStorage) -> CheckResult {
    let start = Instant::now();
    let db = match storage.db() {
        Ok(db) => db,
        Err(e) => {
            return CheckResult::new("DB integrity", CheckStatus::Fail, e.to_string(), start);
        }
    };
    match db.integrity_check().await {
        Ok(problems) if problems.is_empty() => {
            CheckResult::new("DB integrity", CheckStatus::Pass, "ok", start)
        }
        Ok(problems) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("{} issue(s) found", problems.len()),
            start,
        ),
        Err(e) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("check failed: {e}"),
            start,
        ),
    }
}

/// Message jobs whose pending record is gone are discarded at the next
/// rehydrate.
async fn check_orphaned_jobs(storage: &SqliteStorage) -> CheckResult {
    let start = Instant::now();
    let loaded = async {
        let jobs = storage.load_jobs().await?;
        let pending = storage.list_pending(None).await?;
        Ok::<_, MissiveError>((jobs, pending))
    };
    match loaded.await {
        Ok((jobs, pending)) => {
            let recorded: HashSet<_> = pending.iter().map(|p| p.message_id.clone()).collect();
            let orphans = jobs
                .iter()
                .filter_map(|j| j.payload.pending_message_id())
                .filter(|id| !recorded.contains(*id))
                .count();
            if orphans == 0 {
                CheckResult::new(
                    "Pending messages",
                    CheckStatus::Pass,
                    format!("{} job(s), {} pending", jobs.len(), pending.len()),
                    start,
                )
            } else {
                CheckResult::new(
                    "Pending messages",
                    CheckStatus::Warn,
                    format!("{orphans} message job(s) without a pending record"),
                    start,
                )
            }
        }
        Err(e) => CheckResult::new(
            "Pending messages",
            CheckStatus::Fail,
            format!("query failed: {e}"),
            start,
        ),
    }
}

fn check_memory_baseline() -> CheckResult {
    let start = Instant::now();

    #[cfg(not(target_env = "msvc"))]
    {
        let _ = tikv_jemalloc_ctl::epoch::advance();
        let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
        let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
        let allocated_mb = allocated as f64 / (1024.0 * 1024.0);
        let resident_mb = resident as f64 / (1024.0 * 1024.0);
        CheckResult::new(
            "Memory baseline",
            CheckStatus::Pass,
            format!("heap: {allocated_mb:.1} MB, resident: {resident_mb:.1} MB"),
            start,
        )
    }

    #[cfg(target_env = "msvc")]
    {
        CheckResult::new(
            "Memory baseline",
            CheckStatus::Warn,
            "jemalloc not available on MSVC",
            start,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_config::model::StorageConfig;
    use missive_core::{Job, JobPayload};

    async fn temp_storage(dir: &tempfile::TempDir) -> SqliteStorage {
        let storage = SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("doctor.db").to_string_lossy().to_string(),
            wal_mode: true,
        });
        storage.initialize().await.unwrap();
        storage
    }

    #[test]
    fn default_config_passes() {
        let result = check_config(&MissiveConfig::default());
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[test]
    fn invalid_config_fails() {
        let mut config = MissiveConfig::default();
        config.expiry.max_timer_delay_ms = 0;
        assert_eq!(check_config(&config).status, CheckStatus::Fail);
    }

    #[test]
    fn plain_lines_carry_a_tag() {
        let result = CheckResult {
            name: "Database".to_string(),
            status: CheckStatus::Warn,
            message: "not found".to_string(),
            duration: Duration::from_millis(3),
        };
        let line = render_line(&result, false);
        assert!(line.contains("[WARN]"));
        assert!(line.contains("not found (3ms)"));
    }

    #[tokio::test]
    async fn fresh_database_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = temp_storage(&dir).await;
        assert_eq!(check_db_integrity(&storage).await.status, CheckStatus::Pass);
        assert_eq!(check_orphaned_jobs(&storage).await.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn message_job_without_pending_record_warns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = temp_storage(&dir).await;
        let job = Job::new(
            "c",
            JobPayload::NormalMessage {
                message_id: "m1".into(),
                recipients: vec!["c".into()],
            },
            1,
        );
        storage.insert_job(&job, None).await.unwrap();

        let result = check_orphaned_jobs(&storage).await;
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.message.starts_with("1 message job"));
    }
}
