// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pending message cache.
//!
//! The durable `pending_messages` table is the source of truth for crash
//! recovery. An in-memory mirror keyed by message id saves a round trip per
//! attempt and holds the records of ephemeral jobs, which never touch disk.

use std::sync::Arc;

use dashmap::DashMap;
use missive_core::{ConversationId, Job, JobId, MessageId, MissiveError, PendingMessage, Storage};
use tracing::debug;

#[derive(Clone)]
pub struct PendingMessageCache {
    store: Arc<dyn Storage>,
    mirror: Arc<DashMap<MessageId, PendingMessage>>,
}

impl PendingMessageCache {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            store,
            mirror: Arc::new(DashMap::new()),
        }
    }

    /// Record a new job and its pending record. With `durable` set, both
    /// rows are written in one transaction before the mirror is updated.
    pub async fn persist(
        &self,
        job: &Job,
        pending: Option<PendingMessage>,
        durable: bool,
    ) -> Result<(), MissiveError> {
        if durable {
            self.store.insert_job(job, pending.as_ref()).await?;
        }
        if let Some(record) = pending {
            debug!(message_id = %record.message_id, job_id = %job.id, durable, "pending message recorded");
            self.mirror.insert(record.message_id.clone(), record);
        }
        Ok(())
    }

    /// Mirror a record loaded during rehydration.
    pub fn remember(&self, pending: PendingMessage) {
        self.mirror.insert(pending.message_id.clone(), pending);
    }

    pub async fn get(&self, message_id: &MessageId) -> Result<Option<PendingMessage>, MissiveError> {
        if let Some(found) = self.mirror.get(message_id) {
            return Ok(Some(found.clone()));
        }
        let loaded = self.store.get_pending(message_id).await?;
        if let Some(record) = &loaded {
            self.mirror.insert(message_id.clone(), record.clone());
        }
        Ok(loaded)
    }

    /// Store a retry-armed job together with its narrowed pending record.
    pub async fn rearm(
        &self,
        job: &Job,
        pending: Option<&PendingMessage>,
        durable: bool,
    ) -> Result<(), MissiveError> {
        if durable {
            self.store.rearm_job(job, pending).await?;
        }
        if let Some(record) = pending {
            self.mirror.insert(record.message_id.clone(), record.clone());
        }
        Ok(())
    }

    /// Remove a finished job and its pending record.
    pub async fn complete(
        &self,
        job_id: &JobId,
        message_id: Option<&MessageId>,
        durable: bool,
    ) -> Result<(), MissiveError> {
        if durable {
            self.store.complete_job(job_id, message_id).await?;
        }
        if let Some(id) = message_id {
            self.mirror.remove(id);
        }
        Ok(())
    }

    /// Durable records, optionally for one conversation, oldest first.
    pub async fn list(
        &self,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<PendingMessage>, MissiveError> {
        self.store.list_pending(conversation_id).await
    }

    pub fn cached_len(&self) -> usize {
        self.mirror.len()
    }
}
