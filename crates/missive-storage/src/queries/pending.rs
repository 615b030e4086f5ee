// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pending-message records: the recoverable form of an unsent message.

use missive_core::{ConversationId, MessageId, MissiveError, PendingMessage};
use rusqlite::params;

use crate::database::Database;
use crate::models::{pending_from_row, PENDING_COLUMNS};

/// Fetch the pending record of a message.
pub async fn get_pending(
    db: &Database,
    message_id: &MessageId,
) -> Result<Option<PendingMessage>, MissiveError> {
    let message_id = message_id.clone();
    db.connection()
        .call(move |conn| -> Result<Option<PendingMessage>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PENDING_COLUMNS} FROM pending_messages WHERE message_id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![message_id.as_str()], pending_from_row)?;
            rows.next().transpose()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Pending records, optionally limited to one conversation, oldest first.
pub async fn list_pending(
    db: &Database,
    conversation_id: Option<&ConversationId>,
) -> Result<Vec<PendingMessage>, MissiveError> {
    let conversation_id = conversation_id.cloned();
    db.connection()
        .call(move |conn| -> Result<Vec<PendingMessage>, rusqlite::Error> {
            match conversation_id {
                Some(conv) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PENDING_COLUMNS} FROM pending_messages
                         WHERE conversation_id = ?1 ORDER BY created_at ASC"
                    ))?;
                    let rows = stmt.query_map(params![conv.as_str()], pending_from_row)?;
                    rows.collect()
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PENDING_COLUMNS} FROM pending_messages ORDER BY created_at ASC"
                    ))?;
                    let rows = stmt.query_map([], pending_from_row)?;
                    rows.collect()
                }
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Remove a pending record without touching its job.
pub async fn delete_pending(db: &Database, message_id: &MessageId) -> Result<(), MissiveError> {
    let message_id = message_id.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "DELETE FROM pending_messages WHERE message_id = ?1",
                params![message_id.as_str()],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of pending records.
pub async fn count_pending(db: &Database) -> Result<i64, MissiveError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM pending_messages", [], |row| row.get(0))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{Job, JobPayload};
    use tempfile::tempdir;

    use crate::queries::jobs;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    async fn seed(db: &Database, conversation: &str, message: &str, created_at: i64) {
        let job = Job::new(
            conversation,
            JobPayload::NormalMessage {
                message_id: message.into(),
                recipients: vec![conversation.into()],
            },
            created_at,
        );
        let pending = PendingMessage::for_job(&job, vec![1, 2, 3], created_at).unwrap();
        jobs::insert_job(db, &job, Some(&pending)).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_conversation_and_orders_by_age() {
        let (db, _dir) = setup_db().await;
        seed(&db, "c1", "m2", 20).await;
        seed(&db, "c2", "m3", 5).await;
        seed(&db, "c1", "m1", 10).await;

        let all = list_pending(&db, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|p| p.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1", "m2"]);

        let c1 = list_pending(&db, Some(&"c1".into())).await.unwrap();
        let ids: Vec<&str> = c1.iter().map(|p| p.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn content_round_trips_as_blob() {
        let (db, _dir) = setup_db().await;
        seed(&db, "c1", "m1", 1).await;

        let pending = get_pending(&db, &"m1".into()).await.unwrap().unwrap();
        assert_eq!(pending.content, vec![1, 2, 3]);
        assert_eq!(pending.conversation_id.as_str(), "c1");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_leaves_job_in_place() {
        let (db, _dir) = setup_db().await;
        seed(&db, "c1", "m1", 1).await;

        delete_pending(&db, &"m1".into()).await.unwrap();
        assert_eq!(count_pending(&db).await.unwrap(), 0);
        assert_eq!(jobs::count_jobs(&db).await.unwrap(), 1);
        assert!(get_pending(&db, &"missing".into()).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn deleting_a_job_cascades_to_its_pending_record() {
        let (db, _dir) = setup_db().await;
        seed(&db, "c1", "m1", 1).await;
        let job = jobs::load_jobs(&db).await.unwrap().remove(0);

        db.connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM jobs WHERE id = ?1", params![job.id.as_str()])?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count_pending(&db).await.unwrap(), 0);

        db.close().await.unwrap();
    }
}
