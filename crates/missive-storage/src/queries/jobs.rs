// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable job queue operations.
//!
//! A job and its pending-message record always change in the same
//! transaction, so a crash can never leave one without the other.

use missive_core::{Job, JobId, MessageId, MissiveError, PendingMessage};
use rusqlite::params;
use tracing::warn;

use crate::database::Database;
use crate::models::{job_from_row, to_json, JOB_COLUMNS};

/// Insert a job, and its pending record when given, atomically.
pub async fn insert_job(
    db: &Database,
    job: &Job,
    pending: Option<&PendingMessage>,
) -> Result<(), MissiveError> {
    let job = job.clone();
    let pending = pending.cloned();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO jobs (id, conversation_id, kind, payload, created_at, attempts, retry_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.id.as_str(),
                    job.conversation_id.as_str(),
                    job.kind().to_string(),
                    to_json(&job.payload)?,
                    job.created_at,
                    job.attempts,
                    job.retry_at,
                ],
            )?;
            if let Some(p) = pending {
                tx.execute(
                    "INSERT INTO pending_messages
                     (message_id, job_id, conversation_id, recipients, content, sent_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        p.message_id.as_str(),
                        p.job_id.as_str(),
                        p.conversation_id.as_str(),
                        to_json(&p.recipients)?,
                        p.content,
                        p.sent_at,
                        p.created_at,
                    ],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persist the attempt counter of a job about to run.
pub async fn record_attempt(db: &Database, job_id: &JobId, attempts: u32) -> Result<(), MissiveError> {
    let job_id = job_id.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE jobs SET attempts = ?2 WHERE id = ?1",
                params![job_id.as_str(), attempts],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Store a retry-armed job and narrow its pending record's recipients.
pub async fn rearm_job(
    db: &Database,
    job: &Job,
    pending: Option<&PendingMessage>,
) -> Result<(), MissiveError> {
    let job = job.clone();
    let pending = pending.cloned();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE jobs SET payload = ?2, attempts = ?3, retry_at = ?4 WHERE id = ?1",
                params![
                    job.id.as_str(),
                    to_json(&job.payload)?,
                    job.attempts,
                    job.retry_at,
                ],
            )?;
            if let Some(p) = pending {
                tx.execute(
                    "UPDATE pending_messages SET recipients = ?2 WHERE message_id = ?1",
                    params![p.message_id.as_str(), to_json(&p.recipients)?],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete a job that reached a terminal state together with its pending record.
pub async fn complete_job(
    db: &Database,
    job_id: &JobId,
    message_id: Option<&MessageId>,
) -> Result<(), MissiveError> {
    let job_id = job_id.clone();
    let message_id = message_id.cloned();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM pending_messages WHERE job_id = ?1 OR message_id = ?2",
                params![job_id.as_str(), message_id.as_ref().map(|m| m.as_str())],
            )?;
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.as_str()])?;
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All persisted jobs in enqueue order.
///
/// Rows whose payload no longer decodes are logged and left out. They stay
/// stored so a build that understands them can still pick them up.
pub async fn load_jobs(db: &Database) -> Result<Vec<Job>, MissiveError> {
    let (jobs, skipped) = db
        .connection()
        .call(|conn| -> Result<(Vec<Job>, Vec<(String, String)>), rusqlite::Error> {
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY seq ASC"))?;
            let mut rows = stmt.query([])?;
            let mut jobs = Vec::new();
            let mut skipped = Vec::new();
            while let Some(row) = rows.next()? {
                match job_from_row(row) {
                    Ok(job) => jobs.push(job),
                    Err(
                        e @ (rusqlite::Error::FromSqlConversionFailure(..)
                        | rusqlite::Error::InvalidColumnType(..)),
                    ) => {
                        let id: String = row.get(0)?;
                        skipped.push((id, e.to_string()));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok((jobs, skipped))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    for (job_id, error) in &skipped {
        warn!(%job_id, %error, "skipping undecodable job");
    }
    Ok(jobs)
}

pub async fn job_exists(db: &Database, job_id: &JobId) -> Result<bool, MissiveError> {
    let job_id = job_id.clone();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                params![job_id.as_str()],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of persisted jobs.
pub async fn count_jobs(db: &Database) -> Result<i64, MissiveError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{ConversationId, JobPayload};
    use tempfile::tempdir;

    use crate::queries::pending;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn message_job(conversation: &str, message: &str, created_at: i64) -> (Job, PendingMessage) {
        let job = Job::new(
            conversation,
            JobPayload::NormalMessage {
                message_id: message.into(),
                recipients: vec!["a".into(), "b".into()],
            },
            created_at,
        );
        let pending = PendingMessage::for_job(&job, b"body".to_vec(), created_at).unwrap();
        (job, pending)
    }

    #[tokio::test]
    async fn insert_and_load_preserves_fifo_order() {
        let (db, _dir) = setup_db().await;

        // Created-at order deliberately disagrees with insert order.
        let (first, p1) = message_job("c1", "m1", 300);
        let (second, p2) = message_job("c1", "m2", 100);
        insert_job(&db, &first, Some(&p1)).await.unwrap();
        insert_job(&db, &second, Some(&p2)).await.unwrap();

        let jobs = load_jobs(&db).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(jobs[1].id, second.id);
        assert_eq!(jobs[0].payload, first.payload);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_pending_record_rolls_back_job_insert() {
        let (db, _dir) = setup_db().await;

        let (job, pending) = message_job("c1", "m1", 1);
        insert_job(&db, &job, Some(&pending)).await.unwrap();

        // A second job for the same message violates the pending primary key.
        let (dup, mut dup_pending) = message_job("c1", "m1", 2);
        dup_pending.job_id = dup.id.clone();
        let result = insert_job(&db, &dup, Some(&dup_pending)).await;
        assert!(result.is_err());
        assert_eq!(count_jobs(&db).await.unwrap(), 1, "job insert must roll back");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn rearm_narrows_job_and_pending_together() {
        let (db, _dir) = setup_db().await;

        let (mut job, mut pending) = message_job("c1", "m1", 1);
        insert_job(&db, &job, Some(&pending)).await.unwrap();

        job.payload.narrow_recipients(&["b".into()]);
        job.attempts = 2;
        job.retry_at = Some(5_000);
        pending.recipients = job.payload.recipients();
        rearm_job(&db, &job, Some(&pending)).await.unwrap();

        let stored = load_jobs(&db).await.unwrap().remove(0);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.retry_at, Some(5_000));
        assert_eq!(stored.payload.recipients(), vec![ConversationId::from("b")]);

        let stored_pending = pending::get_pending(&db, &"m1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored_pending.recipients, vec![ConversationId::from("b")]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn complete_removes_job_and_pending() {
        let (db, _dir) = setup_db().await;

        let (job, pending) = message_job("c1", "m1", 1);
        insert_job(&db, &job, Some(&pending)).await.unwrap();
        record_attempt(&db, &job.id, 1).await.unwrap();

        assert!(job_exists(&db, &job.id).await.unwrap());
        complete_job(&db, &job.id, Some(&"m1".into())).await.unwrap();
        assert!(!job_exists(&db, &job.id).await.unwrap());
        assert_eq!(count_jobs(&db).await.unwrap(), 0);
        assert!(pending::get_pending(&db, &"m1".into()).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped_but_kept() {
        let (db, _dir) = setup_db().await;
        let (good, pending) = message_job("c1", "m1", 1);
        insert_job(&db, &good, Some(&pending)).await.unwrap();
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO jobs (id, conversation_id, kind, payload, created_at)
                     VALUES ('j1', 'c1', 'normal_message', '{not json', 0),
                            ('j2', 'c2', 'future_kind', '{\"type\":\"future_kind\"}', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let jobs = load_jobs(&db).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, good.id);
        assert_eq!(count_jobs(&db).await.unwrap(), 3);

        db.close().await.unwrap();
    }
}
