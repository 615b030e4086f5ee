// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine lifecycle.
//!
//! [`Engine::start`] wires the outgoing queues, the receipt reconciler and
//! the expiration scheduler around one storage handle and one bus, then
//! brings persisted work back to life. [`Engine::shutdown`] takes it all
//! down again in reverse.

use std::sync::Arc;

use missive_bus::{EventBus, EventReceiver};
use missive_config::MissiveConfig;
use missive_core::{
    ConversationId, Job, JobPayload, MessageId, MessageObserver, MessageStore, MissiveError,
    PendingMessage, PersistenceHook, Receipt, SecureChannel, Storage, StoredMessage, Timestamp,
};
use missive_expiry::ExpirationScheduler;
use missive_receipts::{ReceiptBuffer, ReceiptOutcome, ReceiptReconciler};
use missive_sender::{JobHandle, OutgoingQueues, QueueSettings, SenderContext};
use missive_storage::SqliteStorage;
use tracing::{info, warn};

pub struct Engine {
    config: MissiveConfig,
    storage: Arc<SqliteStorage>,
    bus: EventBus,
    queues: OutgoingQueues,
    reconciler: Arc<ReceiptReconciler>,
    scheduler: ExpirationScheduler,
}

impl Engine {
    /// Start every subsystem on an initialized storage handle.
    ///
    /// Timed messages missing a start are repaired before the scheduler's
    /// first sweep, and persisted jobs are rehydrated last.
    pub async fn start(
        config: MissiveConfig,
        storage: Arc<SqliteStorage>,
        channel: Arc<dyn SecureChannel>,
    ) -> Result<Self, MissiveError> {
        crate::metrics::register_metrics();

        let bus = EventBus::default();
        let dyn_storage: Arc<dyn Storage> = storage.clone();

        let ctx = SenderContext::new(dyn_storage.clone(), channel, bus.clone());
        let queues = OutgoingQueues::new(ctx, QueueSettings::from_config(&config.queue));
        let reconciler = Arc::new(ReceiptReconciler::new(
            dyn_storage.clone(),
            bus.clone(),
            Arc::new(ReceiptBuffer::new()),
            &config.receipts,
        ));
        let scheduler = ExpirationScheduler::new(dyn_storage, bus.clone(), &config.expiry);

        let repaired = scheduler.repair_missing_expiration_starts().await?;
        scheduler.start();
        let resumed = queues.rehydrate().await?;

        info!(repaired, resumed, "missive engine started");
        Ok(Self {
            config,
            storage,
            bus,
            queues,
            reconciler,
            scheduler,
        })
    }

    pub fn config(&self) -> &MissiveConfig {
        &self.config
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    pub fn queues(&self) -> &OutgoingQueues {
        &self.queues
    }

    pub fn receipt_buffer(&self) -> &Arc<ReceiptBuffer> {
        self.reconciler.buffer()
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    /// Queue a job. See [`OutgoingQueues::enqueue`].
    pub async fn enqueue(
        &self,
        job: Job,
        hook: PersistenceHook,
    ) -> Result<JobHandle, MissiveError> {
        self.queues.enqueue(job, hook).await
    }

    /// Queue a normal message for `recipients`, with its pending record.
    pub async fn send_message(
        &self,
        conversation_id: impl Into<ConversationId>,
        message_id: impl Into<MessageId>,
        recipients: Vec<ConversationId>,
        content: Vec<u8>,
        sent_at: Timestamp,
    ) -> Result<JobHandle, MissiveError> {
        let job = Job::new(
            conversation_id,
            JobPayload::NormalMessage {
                message_id: message_id.into(),
                recipients,
            },
            missive_core::now_ms(),
        );
        let pending = PendingMessage::for_job(&job, content, sent_at).ok_or_else(|| {
            MissiveError::Internal("normal message job without a pending record".to_string())
        })?;
        self.enqueue(job, PersistenceHook::PendingMessage(pending))
            .await
    }

    /// The user re-confirmed the changed identities a conversation is held on.
    pub async fn confirm_verification(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, MissiveError> {
        self.queues.confirm_verification(conversation_id).await
    }

    /// The user declined to verify; held jobs in the conversation are cancelled.
    pub fn cancel_verification(&self, conversation_id: &ConversationId) -> bool {
        self.queues
            .cancel_verification(conversation_id, missive_core::now_ms())
    }

    pub fn challenge_solved(&self, conversation_id: &ConversationId) -> bool {
        self.queues.challenge_solved(conversation_id)
    }

    pub async fn on_receipt(&self, receipt: Receipt) -> Result<ReceiptOutcome, MissiveError> {
        self.reconciler.on_receipt(receipt).await
    }

    /// Persist a message row and run the observers that react to it.
    pub async fn save_message(&self, message: &StoredMessage) -> Result<(), MissiveError> {
        self.storage.save_message(message).await?;
        self.message_saved(message).await;
        Ok(())
    }

    /// Tell the engine a message row was written elsewhere.
    pub async fn message_saved(&self, message: &StoredMessage) {
        self.reconciler.on_message_saved(message).await;
        if message.expires_at().is_some() {
            self.scheduler.schedule();
        }
    }

    /// Drain the queues, stop the scheduler and checkpoint the database.
    pub async fn shutdown(self) -> Result<(), MissiveError> {
        let drained = self
            .queues
            .shutdown(self.config.queue.shutdown_timeout())
            .await;
        if let Err(e) = &drained {
            warn!(error = %e, "queues did not drain cleanly");
        }
        self.scheduler.shutdown().await;
        self.storage.close().await?;
        info!("missive engine stopped");
        drained
    }
}
