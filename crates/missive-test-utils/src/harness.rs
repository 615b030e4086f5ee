// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles temp SQLite storage, a notification bus, a mock
//! secure channel and a test-friendly configuration, plus seeding helpers
//! for conversations and messages.

use std::sync::Arc;
use std::time::Duration;

use missive_bus::{BusEvent, EventBus, EventReceiver, Notification};
use missive_config::model::{MissiveConfig, QueueConfig, StorageConfig};
use missive_core::{
    Conversation, ConversationId, ConversationStore, MessageStore, MissiveError, SecureChannel,
    ServiceId, Storage, StoredMessage, Timestamp,
};
use missive_storage::SqliteStorage;

use crate::mock_channel::MockSecureChannel;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    queue: QueueConfig,
    read_receipts: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            queue: QueueConfig {
                max_attempts: Some(5),
                backoff_initial_ms: 10,
                backoff_max_ms: 50,
                backoff_jitter: false,
                shutdown_timeout_secs: 2,
                ..QueueConfig::default()
            },
            read_receipts: true,
        }
    }

    /// Replace the queue settings.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Cap the number of attempts per job.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.queue.max_attempts = Some(attempts);
        self
    }

    /// Turn the account-level read receipts setting on or off.
    pub fn with_read_receipts(mut self, enabled: bool) -> Self {
        self.read_receipts = enabled;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, MissiveError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| MissiveError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let storage_config = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };
        let storage = SqliteStorage::new(storage_config.clone());
        storage.initialize().await?;

        let mut config = MissiveConfig {
            storage: storage_config,
            queue: self.queue,
            ..MissiveConfig::default()
        };
        config.receipts.read_receipts = self.read_receipts;
        config.expiry.debounce_ms = 10;

        Ok(TestHarness {
            storage: Arc::new(storage),
            channel: Arc::new(MockSecureChannel::new()),
            bus: EventBus::default(),
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock channel and temp storage.
pub struct TestHarness {
    /// SQLite storage (temp DB, cleaned up on drop).
    pub storage: Arc<SqliteStorage>,
    /// The mock secure channel.
    pub channel: Arc<MockSecureChannel>,
    pub bus: EventBus,
    pub config: MissiveConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Build a harness with default test settings.
    pub async fn new() -> Result<Self, MissiveError> {
        Self::builder().build().await
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn secure_channel(&self) -> Arc<dyn SecureChannel> {
        self.channel.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Save a registered, trusted direct contact whose send address is
    /// `svc-{id}`.
    pub async fn add_contact(&self, id: &str) -> Result<Conversation, MissiveError> {
        let contact = Conversation::direct(id, format!("svc-{id}"));
        self.storage.save_conversation(&contact).await?;
        Ok(contact)
    }

    /// Save the local account's own conversation.
    pub async fn add_self(&self, id: &str) -> Result<Conversation, MissiveError> {
        let mut me = Conversation::direct(id, format!("svc-{id}"));
        me.is_self = true;
        self.storage.save_conversation(&me).await?;
        Ok(me)
    }

    /// Save a group whose members are the given contacts.
    pub async fn add_group(
        &self,
        id: &str,
        members: &[&str],
    ) -> Result<Conversation, MissiveError> {
        let group = Conversation::group(
            id,
            members
                .iter()
                .map(|m| ServiceId::from(format!("svc-{m}")))
                .collect(),
        );
        self.storage.save_conversation(&group).await?;
        Ok(group)
    }

    /// Save an outgoing message pending to `recipients`.
    pub async fn save_outgoing(
        &self,
        id: &str,
        conversation: &str,
        sent_at: Timestamp,
        recipients: &[&str],
    ) -> Result<StoredMessage, MissiveError> {
        let recipients: Vec<ConversationId> =
            recipients.iter().map(|r| ConversationId::from(*r)).collect();
        let message = StoredMessage::outgoing(id, conversation, sent_at, &recipients);
        self.storage.save_message(&message).await?;
        Ok(message)
    }

    /// Save an unread incoming message authored by `svc-{author}`.
    pub async fn save_incoming(
        &self,
        id: &str,
        conversation: &str,
        author: &str,
        sent_at: Timestamp,
    ) -> Result<StoredMessage, MissiveError> {
        let message =
            StoredMessage::incoming(id, conversation, format!("svc-{author}"), sent_at, sent_at);
        self.storage.save_message(&message).await?;
        Ok(message)
    }

    pub async fn message(&self, id: &str) -> Result<Option<StoredMessage>, MissiveError> {
        self.storage.get_message(&id.into()).await
    }

    /// Write a job row verbatim, bypassing payload encoding.
    pub async fn insert_raw_job(
        &self,
        id: &str,
        conversation: &str,
        kind: &str,
        payload: &str,
    ) -> Result<(), MissiveError> {
        let values = [id, conversation, kind, payload].map(str::to_string);
        self.storage
            .db()?
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO jobs (id, conversation_id, kind, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    rusqlite::params![values[0], values[1], values[2], values[3]],
                )?;
                Ok(())
            })
            .await
            .map_err(|e: tokio_rusqlite::Error<rusqlite::Error>| MissiveError::Storage {
                source: Box::new(e),
            })
    }
}

/// Receive events until one satisfies `matches`, or `timeout` passes.
pub async fn next_matching<F>(
    rx: &mut EventReceiver,
    timeout: Duration,
    mut matches: F,
) -> Option<Notification>
where
    F: FnMut(&Notification) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(BusEvent { notification, .. }) if matches(&notification) => {
                    return Some(notification);
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}
