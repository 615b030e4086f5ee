// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job handlers, one per [`JobPayload`] variant.
//!
//! A handler resolves recipients, performs the send through the secure
//! channel, applies the classifier's side effects and reports a
//! [`HandlerOutcome`]. It never decides backoff or persistence; the queue
//! does that.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use missive_bus::{EventBus, Notification};
use missive_core::{
    ConversationId, Job, JobPayload, MessageId, MissiveError, OutgoingContent, OutgoingReceipt,
    OutgoingReceiptKind, SecureChannel, SendError, SendEvent, SendRequest, SendStatus,
    SendSummary, ServiceId, Storage, Timestamp,
};
use tracing::{debug, info, warn};

use crate::bundle::JobBundle;
use crate::classifier::{classify, Action, SideEffect};
use crate::metrics;
use crate::pending::PendingMessageCache;
use crate::resolver::{resolve, RecipientResolution};

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct SenderContext {
    pub storage: Arc<dyn Storage>,
    pub channel: Arc<dyn SecureChannel>,
    pub bus: EventBus,
    pub pending: PendingMessageCache,
}

impl SenderContext {
    pub fn new(storage: Arc<dyn Storage>, channel: Arc<dyn SecureChannel>, bus: EventBus) -> Self {
        let pending = PendingMessageCache::new(storage.clone());
        Self {
            storage,
            channel,
            bus,
            pending,
        }
    }
}

/// What a handler asks the queue to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    /// Try again later. `recipients` narrows the job when set.
    Retry {
        recipients: Option<Vec<ConversationId>>,
        not_before: Option<Duration>,
        reason: String,
    },
    Failed {
        reason: String,
    },
    /// Local or programming error. Logged and dropped without a bus event.
    Skipped {
        reason: String,
    },
    /// Every target needs its identity re-confirmed. The queue holds the
    /// conversation and runs the job again once trust is settled.
    AwaitingVerification {
        untrusted: Vec<ConversationId>,
    },
    /// The server asked for a rate limit challenge. The queue holds the
    /// conversation and resends to `recipients` once it is solved.
    AwaitingChallenge {
        recipients: Option<Vec<ConversationId>>,
        token: String,
        retry_after: Option<Duration>,
    },
}

/// Retry floor for jobs that do not wait on a challenge.
const SILENT_CHALLENGE_RETRY: Duration = Duration::from_secs(60);

/// Run the handler for `job`'s payload.
pub async fn dispatch(ctx: &SenderContext, job: &Job, bundle: &JobBundle) -> HandlerOutcome {
    let result = match &job.payload {
        JobPayload::NormalMessage { message_id, .. } => {
            send_normal_message(ctx, job, bundle, message_id).await
        }
        JobPayload::Receipts { kind, receipts } => {
            send_receipts(ctx, job, bundle, *kind, receipts).await
        }
        JobPayload::SavedProto {
            content,
            timestamp,
            recipients,
            urgent,
        } => {
            let content = OutgoingContent::SavedProto {
                content: content.clone(),
            };
            send_content(ctx, job, bundle, recipients, content, *timestamp, *urgent).await
        }
        JobPayload::ResendAttachment {
            message_id,
            attachment_id,
            recipients,
        } => {
            let content = OutgoingContent::Attachment {
                message_id: message_id.clone(),
                attachment_id: attachment_id.clone(),
            };
            send_content(ctx, job, bundle, recipients, content, bundle.timestamp, false).await
        }
        JobPayload::PollVote {
            target_message_id,
            target_author,
            target_sent_at,
            option_indexes,
            recipients,
        } => {
            let content = OutgoingContent::PollVote {
                target_message_id: target_message_id.clone(),
                target_author: target_author.clone(),
                target_sent_at: *target_sent_at,
                option_indexes: option_indexes.clone(),
            };
            send_content(ctx, job, bundle, recipients, content, bundle.timestamp, true).await
        }
        JobPayload::NullMessage { recipient, .. } => {
            send_null_message(ctx, job, bundle, recipient).await
        }
    };

    result.unwrap_or_else(outcome_for_error)
}

/// Storage and channel trouble is transient; anything else is a local bug.
fn outcome_for_error(error: MissiveError) -> HandlerOutcome {
    match error {
        MissiveError::Storage { .. }
        | MissiveError::Channel { .. }
        | MissiveError::Timeout { .. }
        | MissiveError::Shutdown => HandlerOutcome::Retry {
            recipients: None,
            not_before: None,
            reason: error.to_string(),
        },
        other => HandlerOutcome::Skipped {
            reason: other.to_string(),
        },
    }
}

/// Mark the still-pending recipients of a message job as failed.
///
/// Called when the queue gives up on a job.
pub async fn abandon(ctx: &SenderContext, job: &Job, now: Timestamp) -> Result<(), MissiveError> {
    if let JobPayload::NormalMessage {
        message_id,
        recipients,
    } = &job.payload
    {
        fail_recipients(ctx, message_id, recipients, now).await?;
    }
    Ok(())
}

async fn send_normal_message(
    ctx: &SenderContext,
    job: &Job,
    bundle: &JobBundle,
    message_id: &MessageId,
) -> Result<HandlerOutcome, MissiveError> {
    if !bundle.should_continue {
        abandon(ctx, job, bundle.started_at).await?;
        return Ok(HandlerOutcome::Failed {
            reason: "retry window elapsed".to_string(),
        });
    }

    let pending = ctx
        .pending
        .get(message_id)
        .await?
        .ok_or_else(|| MissiveError::PendingMessageMissing(message_id.clone()))?;
    let Some(message) = ctx.storage.get_message(message_id).await? else {
        return Ok(HandlerOutcome::Skipped {
            reason: format!("message {message_id} no longer exists"),
        });
    };

    let candidates: Vec<ConversationId> = pending
        .recipients
        .iter()
        .filter(|r| {
            message
                .send_state
                .get(*r)
                .is_none_or(|s| s.status < SendStatus::Sent)
        })
        .cloned()
        .collect();
    if candidates.is_empty() {
        warn!(%message_id, "message already sent to every recipient");
        return Ok(HandlerOutcome::Completed);
    }

    let (owner_is_direct, resolution) = resolve_recipients(ctx, job, &candidates).await?;
    let now = bundle.started_at;

    let dropped: Vec<ConversationId> = resolution
        .dropped
        .iter()
        .map(|(id, _)| id.clone())
        .collect();
    fail_recipients(ctx, message_id, &dropped, now).await?;

    if resolution.has_untrusted() {
        notify_untrusted(ctx, &resolution);
        if resolution.targets.is_empty() {
            info!(%message_id, untrusted = resolution.untrusted.len(), "send blocked until identities are verified");
            return Ok(awaiting_verification(&resolution));
        }
        let untrusted: Vec<ConversationId> = resolution
            .untrusted
            .iter()
            .map(|r| r.conversation_id.clone())
            .collect();
        fail_recipients(ctx, message_id, &untrusted, now).await?;
    }

    if resolution.targets.is_empty() {
        let sent_before = message
            .send_state
            .values()
            .any(|s| s.status >= SendStatus::Sent);
        if owner_is_direct && !sent_before {
            info!(%message_id, "no valid recipients");
            return Ok(HandlerOutcome::Failed {
                reason: "no valid recipients".to_string(),
            });
        }
        info!(%message_id, "nothing left to send");
        return Ok(HandlerOutcome::Completed);
    }
    if resolution.targets_without_self.is_empty() {
        debug!(%message_id, "sending to self only");
    }

    let attempted = resolution.targets.clone();
    let request = SendRequest {
        conversation_id: job.conversation_id.clone(),
        recipients: attempted.clone(),
        content: OutgoingContent::Message {
            message_id: message_id.clone(),
            body: pending.content.clone(),
        },
        timestamp: pending.sent_at,
        urgent: true,
    };

    match timed_send(ctx, request).await {
        Ok(_) => {
            let sent = resolution.conversations_for(&attempted);
            record_sent(ctx, job, message_id, &sent, now).await?;
            info!(%message_id, recipients = sent.len(), "message sent");
            Ok(HandlerOutcome::Completed)
        }
        Err(error) => {
            let classification = classify(&error, &attempted);
            apply_side_effects(ctx, &resolution, &classification.side_effects, now).await?;

            let sent = resolution.conversations_for(&classification.succeeded);
            record_sent(ctx, job, message_id, &sent, now).await?;
            let terminal = resolution.conversations_for(&classification.terminal_recipients);
            fail_recipients(ctx, message_id, &terminal, now).await?;

            let outcome = outcome_for_action(&resolution, classification.action, &error, false);
            if let HandlerOutcome::Failed { .. } = outcome {
                abandon(ctx, job, now).await?;
            }
            if bundle.is_final_attempt {
                warn!(%message_id, %error, "send failed on final attempt");
            }
            Ok(outcome)
        }
    }
}

async fn send_receipts(
    ctx: &SenderContext,
    job: &Job,
    bundle: &JobBundle,
    kind: OutgoingReceiptKind,
    receipts: &[OutgoingReceipt],
) -> Result<HandlerOutcome, MissiveError> {
    if !bundle.should_continue {
        return Ok(HandlerOutcome::Failed {
            reason: "retry window elapsed".to_string(),
        });
    }

    let senders = job.payload.recipients();
    let (_, resolution) = resolve_recipients(ctx, job, &senders).await?;
    if resolution.has_untrusted() {
        info!(%kind, untrusted = resolution.untrusted.len(), "receipts cancelled, recipient needs verification");
        return Ok(HandlerOutcome::Completed);
    }

    let mut retry = Vec::new();
    let mut not_before: Option<Duration> = None;
    let mut last_error = None;
    for recipient in &resolution.accepted {
        let timestamps: Vec<Timestamp> = receipts
            .iter()
            .filter(|r| r.sender == recipient.conversation_id)
            .map(|r| r.sent_at)
            .collect();
        let request = SendRequest {
            conversation_id: recipient.conversation_id.clone(),
            recipients: vec![recipient.service_id.clone()],
            content: OutgoingContent::Receipts { kind, timestamps },
            timestamp: bundle.timestamp,
            urgent: false,
        };
        let Err(error) = timed_send(ctx, request).await else {
            continue;
        };

        let classification = classify(&error, std::slice::from_ref(&recipient.service_id));
        apply_side_effects(ctx, &resolution, &classification.side_effects, bundle.started_at)
            .await?;
        match classification.action {
            Action::Retry {
                not_before: after, ..
            } => {
                retry.push(recipient.conversation_id.clone());
                not_before = not_before.max(after);
            }
            Action::AwaitChallenge { retry_after, .. } => {
                retry.push(recipient.conversation_id.clone());
                not_before = not_before.max(Some(retry_after.unwrap_or(SILENT_CHALLENGE_RETRY)));
            }
            Action::Fail(reason) => {
                warn!(recipient = %recipient.conversation_id, %reason, "dropping receipts");
            }
            Action::Complete => {}
        }
        last_error = Some(error);
    }

    match last_error {
        Some(error) if !retry.is_empty() => Ok(HandlerOutcome::Retry {
            recipients: Some(retry),
            not_before,
            reason: error.to_string(),
        }),
        _ => Ok(HandlerOutcome::Completed),
    }
}

/// Shared path for saved-proto, attachment and poll-vote jobs.
async fn send_content(
    ctx: &SenderContext,
    job: &Job,
    bundle: &JobBundle,
    recipients: &[ConversationId],
    content: OutgoingContent,
    timestamp: Timestamp,
    urgent: bool,
) -> Result<HandlerOutcome, MissiveError> {
    if !bundle.should_continue {
        return Ok(HandlerOutcome::Failed {
            reason: "retry window elapsed".to_string(),
        });
    }

    let (_, resolution) = resolve_recipients(ctx, job, recipients).await?;
    notify_untrusted(ctx, &resolution);
    if resolution.targets.is_empty() {
        if resolution.has_untrusted() {
            info!(kind = %job.kind(), "send blocked until identities are verified");
            return Ok(awaiting_verification(&resolution));
        }
        info!(kind = %job.kind(), "no sendable recipients");
        return Ok(HandlerOutcome::Completed);
    }

    let attempted = resolution.targets.clone();
    let request = SendRequest {
        conversation_id: job.conversation_id.clone(),
        recipients: attempted.clone(),
        content,
        timestamp,
        urgent,
    };
    match timed_send(ctx, request).await {
        Ok(_) => Ok(HandlerOutcome::Completed),
        Err(error) => {
            let classification = classify(&error, &attempted);
            apply_side_effects(ctx, &resolution, &classification.side_effects, bundle.started_at)
                .await?;
            let silent = matches!(job.payload, JobPayload::SavedProto { .. });
            Ok(outcome_for_action(&resolution, classification.action, &error, silent))
        }
    }
}

async fn send_null_message(
    ctx: &SenderContext,
    job: &Job,
    bundle: &JobBundle,
    recipient: &ConversationId,
) -> Result<HandlerOutcome, MissiveError> {
    if !bundle.should_continue {
        return Ok(HandlerOutcome::Failed {
            reason: "retry window elapsed".to_string(),
        });
    }

    let (_, resolution) = resolve_recipients(ctx, job, std::slice::from_ref(recipient)).await?;
    if resolution.has_untrusted() {
        info!(%recipient, "null message cancelled, recipient needs verification");
        return Ok(HandlerOutcome::Completed);
    }
    if resolution.targets.is_empty() {
        info!(%recipient, "null message recipient not sendable");
        return Ok(HandlerOutcome::Completed);
    }

    let attempted = resolution.targets.clone();
    let request = SendRequest {
        conversation_id: job.conversation_id.clone(),
        recipients: attempted.clone(),
        content: OutgoingContent::Null,
        timestamp: bundle.timestamp,
        urgent: false,
    };
    match timed_send(ctx, request).await {
        Ok(_) => Ok(HandlerOutcome::Completed),
        Err(error) => {
            let classification = classify(&error, &attempted);
            apply_side_effects(ctx, &resolution, &classification.side_effects, bundle.started_at)
                .await?;
            Ok(outcome_for_action(&resolution, classification.action, &error, true))
        }
    }
}

/// Load the owning conversation and the candidates, then resolve.
///
/// Also returns whether the owner is a direct conversation with someone
/// other than ourselves.
async fn resolve_recipients(
    ctx: &SenderContext,
    job: &Job,
    candidates: &[ConversationId],
) -> Result<(bool, RecipientResolution), MissiveError> {
    let owner = ctx
        .storage
        .get_conversation(&job.conversation_id)
        .await?
        .ok_or_else(|| MissiveError::ConversationNotFound(job.conversation_id.clone()))?;
    let directory: HashMap<ConversationId, _> = ctx
        .storage
        .get_conversations(candidates)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
    let resolution = resolve(&owner, &directory, candidates);
    Ok((!owner.is_group() && !owner.is_self, resolution))
}

fn awaiting_verification(resolution: &RecipientResolution) -> HandlerOutcome {
    HandlerOutcome::AwaitingVerification {
        untrusted: resolution
            .untrusted
            .iter()
            .map(|r| r.conversation_id.clone())
            .collect(),
    }
}

fn notify_untrusted(ctx: &SenderContext, resolution: &RecipientResolution) {
    for recipient in &resolution.untrusted {
        ctx.bus.publish(Notification::VerificationRequired {
            conversation_id: recipient.conversation_id.clone(),
            service_id: recipient.service_id.clone(),
        });
    }
}

async fn timed_send(ctx: &SenderContext, request: SendRequest) -> Result<SendSummary, SendError> {
    let started = Instant::now();
    let result = ctx.channel.send(request).await;
    metrics::record_send_latency(started.elapsed().as_secs_f64());
    result
}

async fn apply_side_effects(
    ctx: &SenderContext,
    resolution: &RecipientResolution,
    effects: &[SideEffect],
    now: Timestamp,
) -> Result<(), MissiveError> {
    for effect in effects {
        let service_id = effect.service_id();
        let Some(conversation_id) = conversation_for(ctx, resolution, service_id).await? else {
            warn!(%service_id, "no conversation for failed recipient");
            continue;
        };
        match effect {
            SideEffect::MarkUnregistered(_) => {
                ctx.storage.mark_unregistered(&conversation_id, now).await?;
                info!(%conversation_id, "recipient marked unregistered");
                ctx.bus.publish(Notification::RecipientUnregistered {
                    conversation_id,
                    service_id: service_id.clone(),
                });
            }
            SideEffect::VerificationRequired(_) => {
                ctx.storage
                    .set_identity_trusted(&conversation_id, false)
                    .await?;
                ctx.bus.publish(Notification::VerificationRequired {
                    conversation_id,
                    service_id: service_id.clone(),
                });
            }
        }
    }
    Ok(())
}

async fn conversation_for(
    ctx: &SenderContext,
    resolution: &RecipientResolution,
    service_id: &ServiceId,
) -> Result<Option<ConversationId>, MissiveError> {
    if let Some(id) = resolution.conversation_for(service_id) {
        return Ok(Some(id.clone()));
    }
    Ok(ctx
        .storage
        .find_by_service_id(service_id)
        .await?
        .map(|c| c.id))
}

/// `silent` jobs never hold their conversation for a challenge; they retry
/// after the challenge's own delay instead.
fn outcome_for_action(
    resolution: &RecipientResolution,
    action: Action,
    error: &SendError,
    silent: bool,
) -> HandlerOutcome {
    match action {
        Action::Complete => HandlerOutcome::Completed,
        Action::Fail(reason) => HandlerOutcome::Failed {
            reason: reason.to_string(),
        },
        Action::Retry {
            recipients,
            not_before,
        } => HandlerOutcome::Retry {
            recipients: Some(resolution.conversations_for(&recipients)),
            not_before,
            reason: error.to_string(),
        },
        Action::AwaitChallenge {
            recipients,
            retry_after,
            ..
        } if silent => HandlerOutcome::Retry {
            recipients: Some(resolution.conversations_for(&recipients)),
            not_before: Some(retry_after.unwrap_or(SILENT_CHALLENGE_RETRY)),
            reason: error.to_string(),
        },
        Action::AwaitChallenge {
            recipients,
            token,
            retry_after,
        } => HandlerOutcome::AwaitingChallenge {
            recipients: Some(resolution.conversations_for(&recipients)),
            token,
            retry_after,
        },
    }
}

async fn record_sent(
    ctx: &SenderContext,
    job: &Job,
    message_id: &MessageId,
    sent: &[ConversationId],
    now: Timestamp,
) -> Result<(), MissiveError> {
    if sent.is_empty() {
        return Ok(());
    }
    let events: Vec<_> = sent.iter().map(|r| (r.clone(), SendEvent::Sent)).collect();
    ctx.storage
        .apply_send_events(message_id, &events, now)
        .await?;
    ctx.bus.publish(Notification::MessageSent {
        message_id: message_id.clone(),
        conversation_id: job.conversation_id.clone(),
        recipients: sent.to_vec(),
    });
    Ok(())
}

async fn fail_recipients(
    ctx: &SenderContext,
    message_id: &MessageId,
    recipients: &[ConversationId],
    now: Timestamp,
) -> Result<(), MissiveError> {
    if recipients.is_empty() {
        return Ok(());
    }
    let events: Vec<_> = recipients
        .iter()
        .map(|r| (r.clone(), SendEvent::Failed))
        .collect();
    ctx.storage
        .apply_send_events(message_id, &events, now)
        .await?;
    Ok(())
}
