// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation outgoing job queues.
//!
//! Each conversation gets one worker task fed by an unbounded mpsc channel,
//! so jobs within a conversation run strictly in enqueue order. Workers for
//! different conversations run concurrently, bounded by a shared semaphore.
//! A job that needs a retry stays at the head of its conversation's queue
//! until it completes or gives up. A job can also hold its conversation
//! (see [`crate::gate`]) while it waits for identity verification or a rate
//! limit challenge.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use missive_bus::Notification;
use missive_config::model::QueueConfig;
use missive_core::{
    now_ms, ConversationId, Job, JobId, JobResult, MissiveError, PersistenceHook, Timestamp,
};
use missive_resilience::{BackoffPolicy, DedupError, TaskDeduplicator};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::bundle::{duration_ms, job_span, JobBundle};
use crate::gate::{ConversationGates, Hold, Release};
use crate::handlers::{self, HandlerOutcome, SenderContext};
use crate::metrics;

/// Queue tuning derived from `[queue]` configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub max_retry_time: Duration,
    pub backoff: BackoffPolicy,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        let backoff = BackoffPolicy::new(
            Duration::from_millis(config.backoff_initial_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.backoff_multiplier,
        )
        .with_jitter(config.backoff_jitter);
        let max_retry_time = config.max_retry_time();
        let max_attempts = config
            .max_attempts
            .unwrap_or_else(|| backoff.max_attempts_within(max_retry_time))
            .max(1);
        Self {
            max_concurrent: config.max_concurrent_conversations.max(1),
            max_attempts,
            max_retry_time,
            backoff,
        }
    }
}

/// Returned by [`OutgoingQueues::enqueue`] once the job is durably recorded.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the job's terminal result.
    ///
    /// Fails with [`MissiveError::Shutdown`] when the queues stop before the
    /// job finishes. The job then stays persisted for the next start.
    pub async fn completion(self) -> Result<JobResult, MissiveError> {
        self.rx.await.map_err(|_| MissiveError::Shutdown)
    }
}

struct Envelope {
    job: Job,
    persisted: bool,
    done: Option<oneshot::Sender<JobResult>>,
}

struct QueueInner {
    ctx: SenderContext,
    settings: QueueSettings,
    workers: DashMap<ConversationId, mpsc::UnboundedSender<Envelope>>,
    /// Jobs queued or running in memory, by id.
    active: DashMap<JobId, ConversationId>,
    gates: ConversationGates,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    rehydrate: TaskDeduplicator<usize, String>,
}

/// The set of per-conversation queues.
#[derive(Clone)]
pub struct OutgoingQueues {
    inner: Arc<QueueInner>,
}

impl OutgoingQueues {
    pub fn new(ctx: SenderContext, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                ctx,
                permits: Arc::new(Semaphore::new(settings.max_concurrent)),
                settings,
                workers: DashMap::new(),
                active: DashMap::new(),
                gates: ConversationGates::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                rehydrate: TaskDeduplicator::new("rehydrate-jobs"),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Record `job` and queue it behind its conversation's earlier jobs.
    pub async fn enqueue(
        &self,
        job: Job,
        hook: PersistenceHook,
    ) -> Result<JobHandle, MissiveError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MissiveError::Shutdown);
        }

        let (pending, persisted) = match hook {
            PersistenceHook::None => (None, true),
            PersistenceHook::PendingMessage(record) => (Some(record), true),
            PersistenceHook::Ephemeral => (None, false),
        };
        match (job.payload.pending_message_id(), &pending) {
            (Some(message_id), Some(record))
                if &record.message_id == message_id && record.job_id == job.id => {}
            (Some(message_id), _) => {
                return Err(MissiveError::InvalidJob(format!(
                    "message job for {message_id} needs a matching pending record"
                )));
            }
            (None, Some(_)) => {
                return Err(MissiveError::InvalidJob(format!(
                    "{} jobs do not carry a pending record",
                    job.kind()
                )));
            }
            (None, None) => {}
        }

        if !self.claim(&job) {
            return Err(MissiveError::InvalidJob(format!("job {} is already queued", job.id)));
        }
        if let Err(e) = self.inner.ctx.pending.persist(&job, pending, persisted).await {
            self.inner.active.remove(&job.id);
            return Err(e);
        }
        debug!(job_id = %job.id, kind = %job.kind(), conversation_id = %job.conversation_id, persisted, "job enqueued");

        let (tx, rx) = oneshot::channel();
        let job_id = job.id.clone();
        self.submit(Envelope {
            job,
            persisted,
            done: Some(tx),
        })?;
        Ok(JobHandle { job_id, rx })
    }

    /// Reload persisted jobs after a restart and queue them again.
    ///
    /// Concurrent calls share one pass. Jobs already queued in memory are
    /// left alone. Returns how many jobs were resumed.
    pub async fn rehydrate(&self) -> Result<usize, MissiveError> {
        let queues = self.clone();
        self.inner
            .rehydrate
            .run(
                move |_cancel| async move {
                    queues.load_persisted().await.map_err(|e| e.to_string())
                },
                None,
            )
            .await
            .map_err(|e| match e {
                DedupError::Task(message) => MissiveError::Internal(format!(
                    "job rehydration failed: {message}"
                )),
                DedupError::Aborted => MissiveError::Shutdown,
                DedupError::Panicked => {
                    MissiveError::Internal("job rehydration panicked".to_string())
                }
            })
    }

    async fn load_persisted(&self) -> Result<usize, MissiveError> {
        let jobs = self.inner.ctx.storage.load_jobs().await?;
        let total = jobs.len();
        let mut resumed = 0;

        for job in jobs {
            if !self.claim(&job) {
                continue;
            }
            match self.resumable(&job).await {
                Ok(true) => {}
                Ok(false) => {
                    self.inner.active.remove(&job.id);
                    continue;
                }
                Err(e) => {
                    self.inner.active.remove(&job.id);
                    return Err(e);
                }
            }
            self.submit(Envelope {
                job,
                persisted: true,
                done: None,
            })?;
            resumed += 1;
        }

        info!(total, resumed, "outgoing jobs rehydrated");
        Ok(resumed)
    }

    /// Check a claimed job against storage before it runs again.
    async fn resumable(&self, job: &Job) -> Result<bool, MissiveError> {
        let ctx = &self.inner.ctx;
        // The job may have finished after the snapshot was taken.
        if !ctx.storage.job_exists(&job.id).await? {
            debug!(job_id = %job.id, "job finished before it could be resumed");
            return Ok(false);
        }
        if let Some(message_id) = job.payload.pending_message_id() {
            if ctx.pending.get(message_id).await?.is_none() {
                warn!(job_id = %job.id, %message_id, "discarding message job without pending record");
                ctx.storage.complete_job(&job.id, None).await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Mark `job` as queued in memory. False when it already is.
    ///
    /// `finish` deletes the stored row before it drops the claim, so a
    /// rehydrate pass that wins a claim and still finds the row owns the job.
    fn claim(&self, job: &Job) -> bool {
        match self.inner.active.entry(job.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job.conversation_id.clone());
                true
            }
        }
    }

    /// Hand a claimed job to its conversation's worker.
    fn submit(&self, envelope: Envelope) -> Result<(), MissiveError> {
        let conversation_id = envelope.job.conversation_id.clone();
        let job_id = envelope.job.id.clone();
        let sender = self
            .inner
            .workers
            .entry(conversation_id.clone())
            .or_insert_with(|| self.spawn_worker(conversation_id.clone()))
            .clone();
        if sender.send(envelope).is_err() {
            self.inner.active.remove(&job_id);
            return Err(MissiveError::Shutdown);
        }
        Ok(())
    }

    fn spawn_worker(&self, conversation_id: ConversationId) -> mpsc::UnboundedSender<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        self.inner
            .tracker
            .spawn(run_worker(inner, conversation_id, rx));
        tx
    }

    /// The hold on `conversation`, if its queue is waiting on one.
    pub fn hold(&self, conversation: &ConversationId) -> Option<Hold> {
        self.inner.gates.get(conversation)
    }

    /// Trust the identities a held conversation is waiting on and let its
    /// job run again. Returns false when nothing was waiting.
    pub async fn confirm_verification(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, MissiveError> {
        let Some(Hold::Verification { untrusted }) = self.inner.gates.get(conversation) else {
            return Ok(false);
        };
        for id in &untrusted {
            self.inner.ctx.storage.set_identity_trusted(id, true).await?;
        }
        let released = self
            .inner
            .gates
            .release_if(conversation, |h| matches!(h, Hold::Verification { .. }));
        info!(%conversation, confirmed = untrusted.len(), "identities verified");
        Ok(released.is_some())
    }

    /// Give up on a held verification. Jobs in the conversation created at
    /// or before `at` finish as cancelled.
    pub fn cancel_verification(&self, conversation: &ConversationId, at: Timestamp) -> bool {
        let cancelled = self.inner.gates.cancel_verification(conversation, at);
        if cancelled {
            info!(%conversation, "verification cancelled");
        }
        cancelled
    }

    /// The rate limit challenge for `conversation` was solved.
    pub fn challenge_solved(&self, conversation: &ConversationId) -> bool {
        self.inner
            .gates
            .release_if(conversation, |h| matches!(h, Hold::Challenge { .. }))
            .is_some()
    }

    /// Jobs queued or running in memory.
    pub fn active_jobs(&self) -> usize {
        self.inner.active.len()
    }

    /// Conversations with a live worker.
    pub fn conversations(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting work and wait for workers to finish their current
    /// handler call. Queued jobs stay persisted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), MissiveError> {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.workers.clear();

        match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!(left_queued = self.inner.active.len(), "outgoing queues drained");
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, "outgoing queues did not drain in time");
                Err(MissiveError::Timeout { duration: timeout })
            }
        }
    }
}

async fn run_worker(
    inner: Arc<QueueInner>,
    conversation_id: ConversationId,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    debug!(%conversation_id, "queue worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        process(&inner, envelope).await;
    }
    debug!(%conversation_id, "queue worker stopped");
}

/// Run one job to a terminal state, retrying in place.
async fn process(inner: &QueueInner, envelope: Envelope) {
    let Envelope {
        mut job,
        persisted,
        done,
    } = envelope;
    let settings = inner.settings;
    let ctx = &inner.ctx;

    loop {
        if let Some(retry_at) = job.retry_at {
            let wait = retry_at.saturating_sub(now_ms());
            if wait > 0 {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => {
                        debug!(job_id = %job.id, "backoff interrupted by shutdown");
                        inner.active.remove(&job.id);
                        return;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(wait as u64)) => {}
                }
            }
        }

        match inner
            .gates
            .wait(&job.conversation_id, job.created_at, &inner.shutdown)
            .await
        {
            Some(Release::Resume) => {}
            Some(Release::Cancel) => {
                if let Err(e) = handlers::abandon(ctx, &job, now_ms()).await {
                    warn!(job_id = %job.id, error = %e, "failed to mark recipients failed");
                }
                let reason = "identity verification cancelled".to_string();
                finish(inner, &job, persisted, done, JobResult::Cancelled { reason })
                    .instrument(job_span(&job, job.attempts))
                    .await;
                return;
            }
            None => {
                debug!(job_id = %job.id, "hold interrupted by shutdown");
                inner.active.remove(&job.id);
                return;
            }
        }

        let permit = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                inner.active.remove(&job.id);
                return;
            }
            permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        job.attempts += 1;
        if persisted {
            if let Err(e) = ctx.storage.record_attempt(&job.id, job.attempts).await {
                warn!(job_id = %job.id, error = %e, "failed to persist attempt count");
            }
        }

        let now = now_ms();
        let bundle = JobBundle::for_attempt(
            &job,
            job.attempts,
            settings.max_attempts,
            settings.max_retry_time,
            now,
        );
        let span = bundle.span.clone();
        let outcome = handlers::dispatch(ctx, &job, &bundle)
            .instrument(span.clone())
            .await;
        drop(permit);

        let result = match outcome {
            HandlerOutcome::Completed => JobResult::Completed,
            HandlerOutcome::Failed { reason } => JobResult::Failed { reason },
            HandlerOutcome::Skipped { reason } => JobResult::Skipped { reason },
            HandlerOutcome::AwaitingVerification { untrusted } => {
                // A held attempt does not count against the job.
                job.attempts = job.attempts.saturating_sub(1);
                inner
                    .gates
                    .hold(&job.conversation_id, Hold::Verification { untrusted });
                metrics::record_conversation_held("verification");
                rearm(inner, &job, persisted).instrument(span).await;
                continue;
            }
            HandlerOutcome::AwaitingChallenge {
                recipients,
                token,
                retry_after,
            } => {
                job.attempts = job.attempts.saturating_sub(1);
                if let Some(keep) = recipients {
                    if keep.is_empty() {
                        finish(inner, &job, persisted, done, JobResult::Completed)
                            .instrument(span)
                            .await;
                        return;
                    }
                    job.payload.narrow_recipients(&keep);
                }
                let until = retry_after.map(|after| now.saturating_add(duration_ms(after)));
                inner.gates.hold(
                    &job.conversation_id,
                    Hold::Challenge {
                        token: token.clone(),
                        until,
                    },
                );
                metrics::record_conversation_held("challenge");
                ctx.bus.publish(Notification::ChallengeRequired {
                    conversation_id: job.conversation_id.clone(),
                    token,
                });
                rearm(inner, &job, persisted).instrument(span).await;
                continue;
            }
            HandlerOutcome::Retry {
                recipients,
                not_before,
                reason,
            } => {
                if let Some(keep) = recipients {
                    if keep.is_empty() {
                        finish(inner, &job, persisted, done, JobResult::Completed)
                            .instrument(span)
                            .await;
                        return;
                    }
                    job.payload.narrow_recipients(&keep);
                }

                let delay = settings
                    .backoff
                    .delay(job.attempts)
                    .max(not_before.unwrap_or_default());
                let retry_at = now.saturating_add(duration_ms(delay));
                let deadline = job
                    .created_at
                    .saturating_add(duration_ms(settings.max_retry_time));

                if job.attempts >= settings.max_attempts || retry_at >= deadline {
                    if let Err(e) = handlers::abandon(ctx, &job, now).await {
                        warn!(job_id = %job.id, error = %e, "failed to mark recipients failed");
                    }
                    let reason = format!("gave up after {} attempts: {reason}", job.attempts);
                    finish(inner, &job, persisted, done, JobResult::Failed { reason })
                        .instrument(span)
                        .await;
                    return;
                }

                job.retry_at = Some(retry_at);
                rearm(inner, &job, persisted).instrument(span.clone()).await;
                metrics::record_job_retry(job.kind());
                span.in_scope(|| {
                    warn!(
                        attempt = job.attempts,
                        recipients = job.payload.recipients().len(),
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "send failed, will retry"
                    );
                });
                continue;
            }
        };

        finish(inner, &job, persisted, done, result)
            .instrument(span)
            .await;
        return;
    }
}

/// Persist the narrowed job and its pending record together.
async fn rearm(inner: &QueueInner, job: &Job, persisted: bool) {
    let ctx = &inner.ctx;
    let pending = match job.payload.pending_message_id() {
        Some(message_id) => match ctx.pending.get(message_id).await {
            Ok(record) => record.map(|mut record| {
                record.recipients = job.payload.recipients();
                record
            }),
            Err(e) => {
                warn!(error = %e, "failed to load pending record for retry");
                None
            }
        },
        None => None,
    };
    if let Err(e) = ctx.pending.rearm(job, pending.as_ref(), persisted).await {
        warn!(error = %e, "failed to persist retry state");
    }
}

async fn finish(
    inner: &QueueInner,
    job: &Job,
    persisted: bool,
    done: Option<oneshot::Sender<JobResult>>,
    result: JobResult,
) {
    let ctx = &inner.ctx;
    if let Err(e) = ctx
        .pending
        .complete(&job.id, job.payload.pending_message_id(), persisted)
        .await
    {
        error!(error = %e, "failed to remove finished job");
    }
    inner.active.remove(&job.id);

    match &result {
        JobResult::Completed => {
            metrics::record_job_completed(job.kind());
            info!(attempts = job.attempts, "job completed");
        }
        JobResult::Failed { reason } => {
            metrics::record_job_failed(job.kind());
            warn!(attempts = job.attempts, %reason, "job failed");
            ctx.bus.publish(Notification::JobFailed {
                job_id: job.id.clone(),
                conversation_id: job.conversation_id.clone(),
                kind: job.kind(),
                reason: reason.clone(),
            });
        }
        JobResult::Skipped { reason } => {
            warn!(%reason, "job skipped");
        }
        JobResult::Cancelled { reason } => {
            info!(attempts = job.attempts, %reason, "job cancelled");
        }
    }

    if let Some(done) = done {
        let _ = done.send(result);
    }
}
