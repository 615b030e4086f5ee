// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send error classification.
//!
//! Every [`SendError`] falls into one of four categories:
//!
//! | Category           | Errors                                   | Effect                        |
//! |--------------------|------------------------------------------|-------------------------------|
//! | retryable          | network, timeout, server busy            | retry those recipients        |
//! | challenge          | rate limit challenge                     | hold until solved, then retry |
//! | recipient-terminal | identity key changed, unregistered       | recipient failed, side effect |
//! | job-terminal       | payload too large, malformed content     | whole job failed              |

use std::time::Duration;

use missive_core::{RecipientFailure, SendError, ServiceId};
use tracing::error;

/// Why a job failed for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("payload too large ({size} bytes)")]
    PayloadTooLarge { size: usize },

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("all recipients failed")]
    AllRecipientsFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Complete,
    /// Retry only `recipients`, not earlier than `not_before` from now.
    Retry {
        recipients: Vec<ServiceId>,
        not_before: Option<Duration>,
    },
    /// Resend to `recipients` once the challenge is solved or lapses.
    AwaitChallenge {
        recipients: Vec<ServiceId>,
        token: String,
        retry_after: Option<Duration>,
    },
    Fail(FailureReason),
}

/// Follow-up work the handler performs regardless of the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    MarkUnregistered(ServiceId),
    VerificationRequired(ServiceId),
}

impl SideEffect {
    pub fn service_id(&self) -> &ServiceId {
        match self {
            SideEffect::MarkUnregistered(id) | SideEffect::VerificationRequired(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub action: Action,
    pub side_effects: Vec<SideEffect>,
    /// Recipients the send reached despite the error.
    pub succeeded: Vec<ServiceId>,
    /// Recipients that failed for good.
    pub terminal_recipients: Vec<ServiceId>,
}

enum Category {
    Retryable(Option<Duration>),
    Challenge {
        token: String,
        retry_after: Option<Duration>,
    },
    RecipientTerminal(SideEffect),
    JobTerminal(FailureReason),
}

fn categorize(error: &SendError, recipient: Option<&ServiceId>) -> Category {
    match error {
        SendError::Network(_) | SendError::Timeout | SendError::Partial { .. } => {
            Category::Retryable(None)
        }
        SendError::ServerBusy { retry_after } => Category::Retryable(*retry_after),
        SendError::Challenge { token, retry_after } => Category::Challenge {
            token: token.clone(),
            retry_after: *retry_after,
        },
        SendError::IdentityKeyChanged(id) => {
            Category::RecipientTerminal(SideEffect::VerificationRequired(id.clone()))
        }
        SendError::Unregistered(id) => {
            Category::RecipientTerminal(SideEffect::MarkUnregistered(id.clone()))
        }
        SendError::PayloadTooLarge { size } => {
            error!(?recipient, size, "payload rejected as too large");
            Category::JobTerminal(FailureReason::PayloadTooLarge { size: *size })
        }
        SendError::MalformedContent(detail) => {
            error!(?recipient, %detail, "content rejected as malformed");
            Category::JobTerminal(FailureReason::MalformedContent(detail.clone()))
        }
    }
}

/// Decide what to do after `error` for a send attempted to `attempted`.
pub fn classify(error: &SendError, attempted: &[ServiceId]) -> Classification {
    if let SendError::Partial {
        succeeded,
        failures,
    } = error
    {
        return classify_partial(attempted, succeeded, failures);
    }

    let mut side_effects = Vec::new();
    let mut terminal_recipients = Vec::new();
    let action = match categorize(error, None) {
        Category::Retryable(not_before) => Action::Retry {
            recipients: attempted.to_vec(),
            not_before,
        },
        Category::Challenge { token, retry_after } => Action::AwaitChallenge {
            recipients: attempted.to_vec(),
            token,
            retry_after,
        },
        Category::JobTerminal(reason) => Action::Fail(reason),
        Category::RecipientTerminal(effect) => {
            let recipient = effect.service_id().clone();
            let remaining: Vec<ServiceId> = attempted
                .iter()
                .filter(|r| **r != recipient)
                .cloned()
                .collect();
            side_effects.push(effect);
            terminal_recipients.push(recipient);
            if remaining.is_empty() {
                Action::Fail(FailureReason::AllRecipientsFailed)
            } else {
                // The rest were never confirmed; send to them again.
                Action::Retry {
                    recipients: remaining,
                    not_before: None,
                }
            }
        }
    };
    Classification {
        action,
        side_effects,
        succeeded: Vec::new(),
        terminal_recipients,
    }
}

/// Attempted recipients the error does not mention count as reached.
fn classify_partial(
    attempted: &[ServiceId],
    succeeded: &[ServiceId],
    failures: &[RecipientFailure],
) -> Classification {
    let mut retry = Vec::new();
    let mut not_before: Option<Duration> = None;
    let mut challenge: Option<(String, Option<Duration>)> = None;
    let mut side_effects = Vec::new();
    let mut terminal_recipients = Vec::new();
    let mut job_terminal: Option<FailureReason> = None;

    for failure in failures {
        match categorize(&failure.error, Some(&failure.recipient)) {
            Category::Retryable(after) => {
                if !retry.contains(&failure.recipient) {
                    retry.push(failure.recipient.clone());
                }
                not_before = not_before.max(after);
            }
            Category::Challenge { token, retry_after } => {
                if !retry.contains(&failure.recipient) {
                    retry.push(failure.recipient.clone());
                }
                let (_, after) = challenge.get_or_insert((token, None));
                *after = (*after).max(retry_after);
            }
            Category::RecipientTerminal(effect) => {
                terminal_recipients.push(failure.recipient.clone());
                side_effects.push(effect);
            }
            Category::JobTerminal(reason) => {
                job_terminal.get_or_insert(reason);
            }
        }
    }

    let mut reached = succeeded.to_vec();
    for recipient in attempted {
        let mentioned = reached.contains(recipient)
            || failures.iter().any(|f| &f.recipient == recipient);
        if !mentioned {
            reached.push(recipient.clone());
        }
    }

    let action = if let Some(reason) = job_terminal {
        Action::Fail(reason)
    } else if let Some((token, retry_after)) = challenge {
        Action::AwaitChallenge {
            recipients: retry,
            token,
            retry_after: retry_after.max(not_before),
        }
    } else if !retry.is_empty() {
        Action::Retry {
            recipients: retry,
            not_before,
        }
    } else if !reached.is_empty() {
        Action::Complete
    } else {
        Action::Fail(FailureReason::AllRecipientsFailed)
    };

    Classification {
        action,
        side_effects,
        succeeded: reached,
        terminal_recipients,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServiceId {
        ServiceId::from(s)
    }

    fn failure(recipient: &str, error: SendError) -> RecipientFailure {
        RecipientFailure {
            recipient: sid(recipient),
            error,
        }
    }

    #[test]
    fn transient_errors_retry_everyone() {
        let attempted = vec![sid("a"), sid("b")];
        for err in [SendError::Network("reset".into()), SendError::Timeout] {
            let c = classify(&err, &attempted);
            assert_eq!(
                c.action,
                Action::Retry {
                    recipients: attempted.clone(),
                    not_before: None
                }
            );
        }
    }

    #[test]
    fn server_busy_sets_floor() {
        let err = SendError::ServerBusy {
            retry_after: Some(Duration::from_secs(30)),
        };
        let c = classify(&err, &[sid("a")]);
        assert_eq!(
            c.action,
            Action::Retry {
                recipients: vec![sid("a")],
                not_before: Some(Duration::from_secs(30)),
            }
        );
    }

    #[test]
    fn local_errors_fail_the_job() {
        let c = classify(&SendError::PayloadTooLarge { size: 10 }, &[sid("a")]);
        assert_eq!(
            c.action,
            Action::Fail(FailureReason::PayloadTooLarge { size: 10 })
        );
        let c = classify(&SendError::MalformedContent("bad".into()), &[sid("a")]);
        assert!(matches!(
            c.action,
            Action::Fail(FailureReason::MalformedContent(_))
        ));
    }

    #[test]
    fn sole_identity_change_fails_with_side_effect() {
        let c = classify(&SendError::IdentityKeyChanged(sid("a")), &[sid("a")]);
        assert_eq!(c.action, Action::Fail(FailureReason::AllRecipientsFailed));
        assert_eq!(c.side_effects, vec![SideEffect::VerificationRequired(sid("a"))]);
        assert_eq!(c.terminal_recipients, vec![sid("a")]);
    }

    #[test]
    fn unregistered_among_many_retries_the_rest() {
        let c = classify(&SendError::Unregistered(sid("b")), &[sid("a"), sid("b")]);
        assert_eq!(
            c.action,
            Action::Retry {
                recipients: vec![sid("a")],
                not_before: None
            }
        );
        assert_eq!(c.side_effects, vec![SideEffect::MarkUnregistered(sid("b"))]);
    }

    #[test]
    fn partial_with_transient_and_terminal_failures() {
        // R1 succeeded, R2 timed out, R3 changed identity.
        let err = SendError::Partial {
            succeeded: vec![sid("r1")],
            failures: vec![
                failure("r2", SendError::Timeout),
                failure("r3", SendError::IdentityKeyChanged(sid("r3"))),
            ],
        };
        let c = classify(&err, &[sid("r1"), sid("r2"), sid("r3")]);
        assert_eq!(
            c.action,
            Action::Retry {
                recipients: vec![sid("r2")],
                not_before: None
            }
        );
        assert_eq!(c.succeeded, vec![sid("r1")]);
        assert_eq!(c.terminal_recipients, vec![sid("r3")]);
        assert_eq!(c.side_effects, vec![SideEffect::VerificationRequired(sid("r3"))]);
    }

    #[test]
    fn partial_with_only_terminal_failures_completes() {
        let err = SendError::Partial {
            succeeded: vec![sid("r1")],
            failures: vec![failure("r2", SendError::Unregistered(sid("r2")))],
        };
        let c = classify(&err, &[sid("r1"), sid("r2")]);
        assert_eq!(c.action, Action::Complete);
    }

    #[test]
    fn partial_with_nobody_reached_fails() {
        let err = SendError::Partial {
            succeeded: vec![],
            failures: vec![failure("r2", SendError::Unregistered(sid("r2")))],
        };
        let c = classify(&err, &[sid("r2")]);
        assert_eq!(c.action, Action::Fail(FailureReason::AllRecipientsFailed));
    }

    #[test]
    fn job_terminal_sub_error_wins() {
        let err = SendError::Partial {
            succeeded: vec![sid("r1")],
            failures: vec![
                failure("r2", SendError::Timeout),
                failure("r3", SendError::PayloadTooLarge { size: 99 }),
            ],
        };
        let c = classify(&err, &[sid("r1"), sid("r2"), sid("r3")]);
        assert_eq!(
            c.action,
            Action::Fail(FailureReason::PayloadTooLarge { size: 99 })
        );
        assert_eq!(c.succeeded, vec![sid("r1")]);
    }

    #[test]
    fn busy_floor_is_the_longest_requested() {
        let err = SendError::Partial {
            succeeded: vec![],
            failures: vec![
                failure(
                    "a",
                    SendError::ServerBusy {
                        retry_after: Some(Duration::from_secs(5)),
                    },
                ),
                failure(
                    "b",
                    SendError::ServerBusy {
                        retry_after: Some(Duration::from_secs(20)),
                    },
                ),
            ],
        };
        let c = classify(&err, &[sid("a"), sid("b")]);
        assert_eq!(
            c.action,
            Action::Retry {
                recipients: vec![sid("a"), sid("b")],
                not_before: Some(Duration::from_secs(20)),
            }
        );
    }

    #[test]
    fn omitted_recipients_count_as_reached() {
        let err = SendError::Partial {
            succeeded: vec![sid("r1")],
            failures: vec![failure("r2", SendError::Unregistered(sid("r2")))],
        };
        let c = classify(&err, &[sid("r1"), sid("r2"), sid("r3")]);
        assert_eq!(c.action, Action::Complete);
        assert_eq!(c.succeeded, vec![sid("r1"), sid("r3")]);
        assert_eq!(c.terminal_recipients, vec![sid("r2")]);
    }

    #[test]
    fn challenge_holds_every_attempted_recipient() {
        let err = SendError::Challenge {
            token: "tok".into(),
            retry_after: Some(Duration::from_secs(90)),
        };
        let c = classify(&err, &[sid("a"), sid("b")]);
        assert_eq!(
            c.action,
            Action::AwaitChallenge {
                recipients: vec![sid("a"), sid("b")],
                token: "tok".into(),
                retry_after: Some(Duration::from_secs(90)),
            }
        );
        assert!(c.side_effects.is_empty());
    }

    #[test]
    fn challenge_outranks_retry_but_not_job_terminal() {
        let challenged = failure(
            "b",
            SendError::Challenge {
                token: "tok".into(),
                retry_after: None,
            },
        );
        let err = SendError::Partial {
            succeeded: vec![sid("a")],
            failures: vec![failure("c", SendError::Timeout), challenged.clone()],
        };
        let c = classify(&err, &[sid("a"), sid("b"), sid("c")]);
        assert_eq!(
            c.action,
            Action::AwaitChallenge {
                recipients: vec![sid("c"), sid("b")],
                token: "tok".into(),
                retry_after: None,
            }
        );

        let err = SendError::Partial {
            succeeded: vec![],
            failures: vec![challenged, failure("c", SendError::MalformedContent("x".into()))],
        };
        let c = classify(&err, &[sid("b"), sid("c")]);
        assert!(matches!(c.action, Action::Fail(FailureReason::MalformedContent(_))));
    }

    #[test]
    fn side_effect_names_its_recipient() {
        assert_eq!(SideEffect::MarkUnregistered(sid("x")).service_id(), &sid("x"));
        assert_eq!(
            SideEffect::VerificationRequired(sid("y")).service_id(),
            &sid("y")
        );
    }
}
