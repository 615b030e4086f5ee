// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the persistence traits.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use missive_config::model::StorageConfig;
use missive_core::{
    Conversation, ConversationId, ConversationStore, Job, JobId, JobStore, MessageId,
    MessageStore, MissiveError, PendingMessage, SendEvent, ServiceId, StoredMessage, Timestamp,
};

use crate::database::Database;
use crate::queries;

/// Row counts reported by `missive status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub jobs: i64,
    pub pending_messages: i64,
    pub conversations: i64,
    pub expiring_messages: i64,
}

/// SQLite-backed storage.
///
/// Wraps a [`Database`] handle and delegates every operation to the typed
/// query modules. The database is opened by [`SqliteStorage::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`Self::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Open the database and run migrations.
    pub async fn initialize(&self) -> Result<(), MissiveError> {
        let path = self.config.database_path.clone();
        let db = Database::open_with_options(&path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| MissiveError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    /// Returns the underlying Database, or an error if not initialized.
    pub fn db(&self) -> Result<&Database, MissiveError> {
        self.db.get().ok_or_else(|| MissiveError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    pub async fn health_check(&self) -> Result<(), MissiveError> {
        self.db()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)
    }

    pub async fn stats(&self) -> Result<StorageStats, MissiveError> {
        let db = self.db()?;
        Ok(StorageStats {
            jobs: queries::jobs::count_jobs(db).await?,
            pending_messages: queries::pending::count_pending(db).await?,
            conversations: queries::conversations::count_conversations(db).await?,
            expiring_messages: queries::messages::count_expiring(db).await?,
        })
    }

    /// Checkpoint the WAL. Safe to call when never initialized.
    pub async fn close(&self) -> Result<(), MissiveError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn insert_job(
        &self,
        job: &Job,
        pending: Option<&PendingMessage>,
    ) -> Result<(), MissiveError> {
        queries::jobs::insert_job(self.db()?, job, pending).await
    }

    async fn record_attempt(&self, job_id: &JobId, attempts: u32) -> Result<(), MissiveError> {
        queries::jobs::record_attempt(self.db()?, job_id, attempts).await
    }

    async fn rearm_job(
        &self,
        job: &Job,
        pending: Option<&PendingMessage>,
    ) -> Result<(), MissiveError> {
        queries::jobs::rearm_job(self.db()?, job, pending).await
    }

    async fn complete_job(
        &self,
        job_id: &JobId,
        message_id: Option<&MessageId>,
    ) -> Result<(), MissiveError> {
        queries::jobs::complete_job(self.db()?, job_id, message_id).await
    }

    async fn load_jobs(&self) -> Result<Vec<Job>, MissiveError> {
        queries::jobs::load_jobs(self.db()?).await
    }

    async fn job_exists(&self, job_id: &JobId) -> Result<bool, MissiveError> {
        queries::jobs::job_exists(self.db()?, job_id).await
    }

    async fn get_pending(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<PendingMessage>, MissiveError> {
        queries::pending::get_pending(self.db()?, message_id).await
    }

    async fn list_pending(
        &self,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<PendingMessage>, MissiveError> {
        queries::pending::list_pending(self.db()?, conversation_id).await
    }

    async fn delete_pending(&self, message_id: &MessageId) -> Result<(), MissiveError> {
        queries::pending::delete_pending(self.db()?, message_id).await
    }
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn save_message(&self, message: &StoredMessage) -> Result<(), MissiveError> {
        queries::messages::save_message(self.db()?, message).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>, MissiveError> {
        queries::messages::get_message(self.db()?, id).await
    }

    async fn messages_by_sent_at(
        &self,
        sent_at: Timestamp,
    ) -> Result<Vec<StoredMessage>, MissiveError> {
        queries::messages::messages_by_sent_at(self.db()?, sent_at).await
    }

    async fn apply_send_events(
        &self,
        id: &MessageId,
        events: &[(ConversationId, SendEvent)],
        at: Timestamp,
    ) -> Result<Option<StoredMessage>, MissiveError> {
        queries::messages::apply_send_events(self.db()?, id, events, at).await
    }

    async fn mark_read(
        &self,
        id: &MessageId,
        read_at: Timestamp,
    ) -> Result<Option<StoredMessage>, MissiveError> {
        queries::messages::mark_read(self.db()?, id, read_at).await
    }

    async fn mark_read_up_to(
        &self,
        conversation_id: &ConversationId,
        sent_at: Timestamp,
        read_at: Timestamp,
    ) -> Result<Vec<StoredMessage>, MissiveError> {
        queries::messages::mark_read_up_to(self.db()?, conversation_id, sent_at, read_at).await
    }

    async fn start_expiration(
        &self,
        id: &MessageId,
        start: Timestamp,
    ) -> Result<(), MissiveError> {
        let started = queries::messages::start_expiration(self.db()?, id, start).await?;
        if !started {
            debug!(message_id = %id, "expiration already started or no timer");
        }
        Ok(())
    }

    async fn expired_messages(&self, now: Timestamp) -> Result<Vec<StoredMessage>, MissiveError> {
        queries::messages::expired_messages(self.db()?, now).await
    }

    async fn next_expiration(&self) -> Result<Option<Timestamp>, MissiveError> {
        queries::messages::next_expiration(self.db()?).await
    }

    async fn messages_missing_expiration_start(
        &self,
    ) -> Result<Vec<StoredMessage>, MissiveError> {
        queries::messages::messages_missing_expiration_start(self.db()?).await
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> Result<usize, MissiveError> {
        queries::messages::delete_messages(self.db()?, ids).await
    }
}

#[async_trait]
impl ConversationStore for SqliteStorage {
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), MissiveError> {
        queries::conversations::save_conversation(self.db()?, conversation).await
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, MissiveError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn get_conversations(
        &self,
        ids: &[ConversationId],
    ) -> Result<Vec<Conversation>, MissiveError> {
        queries::conversations::get_conversations(self.db()?, ids).await
    }

    async fn find_by_service_id(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<Conversation>, MissiveError> {
        queries::conversations::find_by_service_id(self.db()?, service_id).await
    }

    async fn mark_unregistered(
        &self,
        id: &ConversationId,
        at: Timestamp,
    ) -> Result<(), MissiveError> {
        queries::conversations::mark_unregistered(self.db()?, id, at).await
    }

    async fn set_identity_trusted(
        &self,
        id: &ConversationId,
        trusted: bool,
    ) -> Result<(), MissiveError> {
        queries::conversations::set_identity_trusted(self.db()?, id, trusted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::JobPayload;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn initialize_opens_database_at_configured_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("init_test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        storage.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("uninit.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        let err = storage.load_jobs().await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn double_initialize_is_rejected() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("twice.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_stored_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("stats.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();

        storage
            .save_conversation(&Conversation::direct("c1", "s1"))
            .await
            .unwrap();
        let job = Job::new(
            "c1",
            JobPayload::NormalMessage {
                message_id: "m1".into(),
                recipients: vec!["c1".into()],
            },
            1,
        );
        let pending = PendingMessage::for_job(&job, Vec::new(), 1).unwrap();
        storage.insert_job(&job, Some(&pending)).await.unwrap();

        let mut msg = StoredMessage::outgoing("m1", "c1", 1, &["c1".into()]);
        msg.expire_timer_ms = Some(1_000);
        msg.expiration_start = Some(1);
        storage.save_message(&msg).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(
            stats,
            StorageStats {
                jobs: 1,
                pending_messages: 1,
                conversations: 1,
                expiring_messages: 1,
            }
        );
        storage.close().await.unwrap();
    }
}
