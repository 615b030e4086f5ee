// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-flight execution of a named task.
//!
//! The first caller spawns the task body; callers that arrive while it runs
//! join it and receive a clone of its outcome. Every joined caller counts as a
//! waiter. A waiter that aborts stops waiting immediately, but the body's
//! [`CancellationToken`] is only cancelled once the last waiter has left.
//!
//! A caller arriving while a cancelled run is still winding down waits for
//! that run to settle and then starts a fresh one, so two bodies never run at
//! the same time.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DedupError<E> {
    /// This caller's abort signal fired before the task settled.
    #[error("task aborted by caller")]
    Aborted,

    #[error("task failed: {0}")]
    Task(E),

    #[error("task panicked")]
    Panicked,
}

type SharedRun<T, E> = Shared<BoxFuture<'static, Result<T, DedupError<E>>>>;

struct InFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    generation: u64,
    shared: SharedRun<T, E>,
    waiters: usize,
    cancel: CancellationToken,
}

struct State<T, E>
where
    T: Clone,
    E: Clone,
{
    next_generation: u64,
    in_flight: Option<InFlight<T, E>>,
}

struct Inner<T, E>
where
    T: Clone,
    E: Clone,
{
    name: String,
    state: Mutex<State<T, E>>,
}

impl<T, E> Inner<T, E>
where
    T: Clone,
    E: Clone,
{
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear bookkeeping for a run that settled.
    fn settle(&self, generation: u64) {
        let mut state = self.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|run| run.generation == generation)
        {
            state.in_flight = None;
        }
    }

    /// Drop one waiter; the last one out cancels the body.
    fn leave(&self, generation: u64) {
        let mut state = self.lock();
        if let Some(run) = state
            .in_flight
            .as_mut()
            .filter(|run| run.generation == generation)
        {
            run.waiters = run.waiters.saturating_sub(1);
            if run.waiters == 0 {
                debug!(task = %self.name, generation, "last waiter aborted, cancelling task");
                run.cancel.cancel();
            }
        }
    }
}

enum Admission<F, T, E>
where
    T: Clone,
    E: Clone,
{
    Joined {
        generation: u64,
        shared: SharedRun<T, E>,
    },
    /// A cancelled run is still winding down; the task comes back unused.
    Settling {
        task: F,
        shared: SharedRun<T, E>,
    },
}

/// At most one concurrent execution of a named task.
pub struct TaskDeduplicator<T, E>
where
    T: Clone,
    E: Clone,
{
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for TaskDeduplicator<T, E>
where
    T: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> TaskDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    next_generation: 0,
                    in_flight: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    /// Run `task`, or join the run already in flight.
    ///
    /// `task` receives the run's cancellation token and is only invoked when
    /// this call starts a new run. `abort` lets this caller stop waiting.
    pub async fn run<F, Fut>(
        &self,
        task: F,
        abort: Option<CancellationToken>,
    ) -> Result<T, DedupError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if abort.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(DedupError::Aborted);
        }

        let mut task = task;
        let (generation, shared) = loop {
            match self.admit(task) {
                Admission::Joined { generation, shared } => break (generation, shared),
                Admission::Settling {
                    task: returned,
                    shared,
                } => {
                    task = returned;
                    debug!(task = %self.inner.name, "waiting for cancelled run to settle");
                    tokio::select! {
                        _ = shared => {}
                        _ = aborted(abort.as_ref()) => return Err(DedupError::Aborted),
                    }
                }
            }
        };

        tokio::select! {
            outcome = shared => outcome,
            _ = aborted(abort.as_ref()) => {
                self.inner.leave(generation);
                Err(DedupError::Aborted)
            }
        }
    }

    /// Join the live run, start a new one, or report a run that is winding down.
    fn admit<F, Fut>(&self, task: F) -> Admission<F, T, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut state = self.inner.lock();

        if let Some(run) = state.in_flight.as_mut() {
            if run.cancel.is_cancelled() {
                return Admission::Settling {
                    task,
                    shared: run.shared.clone(),
                };
            }
            run.waiters += 1;
            debug!(task = %self.inner.name, waiters = run.waiters, "joined in-flight run");
            return Admission::Joined {
                generation: run.generation,
                shared: run.shared.clone(),
            };
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let cancel = CancellationToken::new();

        let body = tokio::spawn(task(cancel.clone()));
        let inner = Arc::clone(&self.inner);
        let settled = tokio::spawn(async move {
            let outcome = match body.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(DedupError::Task(e)),
                Err(e) => {
                    warn!(task = %inner.name, error = %e, "deduplicated task panicked");
                    Err(DedupError::Panicked)
                }
            };
            inner.settle(generation);
            outcome
        });
        let shared = async move {
            settled
                .await
                .unwrap_or_else(|_| Err(DedupError::Panicked))
        }
        .boxed()
        .shared();

        debug!(task = %self.inner.name, generation, "started run");
        state.in_flight = Some(InFlight {
            generation,
            shared: shared.clone(),
            waiters: 1,
            cancel,
        });
        Admission::Joined { generation, shared }
    }
}

async fn aborted(abort: Option<&CancellationToken>) {
    match abort {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Dedup = TaskDeduplicator<usize, String>;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let dedup = Dedup::new("sweep");
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move |_cancel: CancellationToken| async move {
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(n)
            }
        };

        let (a, b, c) = tokio::join!(
            dedup.run(make(runs.clone()), None),
            dedup.run(make(runs.clone()), None),
            dedup.run(make(runs.clone()), None),
        );
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(c, Ok(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_running());
    }

    #[tokio::test]
    async fn sequential_runs_execute_again() {
        let dedup = Dedup::new("sweep");
        let runs = Arc::new(AtomicUsize::new(0));
        for expected in 1..=3 {
            let runs = runs.clone();
            let out = dedup
                .run(
                    move |_| async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) },
                    None,
                )
                .await;
            assert_eq!(out, Ok(expected));
        }
    }

    #[tokio::test]
    async fn task_error_reaches_every_waiter() {
        let dedup = Dedup::new("failing");
        let task = |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<usize, _>("boom".to_string())
        };
        let (a, b) = tokio::join!(dedup.run(task, None), dedup.run(task, None));
        assert_eq!(a, Err(DedupError::Task("boom".into())));
        assert_eq!(b, Err(DedupError::Task("boom".into())));
        assert!(!dedup.is_running());
    }

    #[tokio::test]
    async fn panic_is_reported_and_bookkeeping_cleared() {
        let dedup = Dedup::new("panicky");
        let out = dedup
            .run(
                |_| async {
                    if true {
                        panic!("body exploded");
                    }
                    Ok(0)
                },
                None,
            )
            .await;
        assert_eq!(out, Err(DedupError::Panicked));

        let out = dedup.run(|_| async { Ok(7) }, None).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn pre_aborted_caller_never_starts_task() {
        let dedup = Dedup::new("sweep");
        let abort = CancellationToken::new();
        abort.cancel();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let out = dedup
            .run(
                move |_| async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(1)
                },
                Some(abort),
            )
            .await;
        assert_eq!(out, Err(DedupError::Aborted));
        assert!(!started.load(Ordering::SeqCst));
        assert!(!dedup.is_running());
    }

    #[tokio::test]
    async fn one_waiter_aborting_does_not_cancel_body() {
        let dedup = Dedup::new("sweep");
        let abort_a = CancellationToken::new();

        // Returns 1 if it observed cancellation, 0 otherwise.
        let task = |cancel: CancellationToken| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(usize::from(cancel.is_cancelled()))
        };

        let a = dedup.run(task, Some(abort_a.clone()));
        let b = dedup.run(task, None);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort_a.cancel();
        };
        let (a, b, ()) = tokio::join!(a, b, trigger);
        assert_eq!(a, Err(DedupError::Aborted));
        assert_eq!(b, Ok(0));
    }

    #[tokio::test]
    async fn last_waiter_aborting_cancels_body() {
        let dedup = Dedup::new("sweep");
        let observed = Arc::new(AtomicBool::new(false));
        let abort = CancellationToken::new();

        let flag = observed.clone();
        let task = move |cancel: CancellationToken| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(0)
        };

        let run = dedup.run(task, Some(abort.clone()));
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort.cancel();
        };
        let (out, ()) = tokio::join!(run, trigger);
        assert_eq!(out, Err(DedupError::Aborted));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(!dedup.is_running());
    }

    #[tokio::test]
    async fn caller_during_wind_down_starts_fresh_run_after_settle() {
        let dedup = Dedup::new("sweep");
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicUsize::new(0));

        let make = |running: Arc<AtomicUsize>,
                    overlap: Arc<AtomicBool>,
                    generation: Arc<AtomicUsize>| {
            move |cancel: CancellationToken| async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.store(true, Ordering::SeqCst);
                }
                let id = generation.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // Slow wind-down after cancellation.
                        tokio::time::sleep(Duration::from_millis(60)).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(30)) => {}
                }
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(id)
            }
        };

        let abort = CancellationToken::new();
        let first = dedup.run(
            make(running.clone(), overlap.clone(), generation.clone()),
            Some(abort.clone()),
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            abort.cancel();
            tokio::time::sleep(Duration::from_millis(5)).await;
            dedup
                .run(
                    make(running.clone(), overlap.clone(), generation.clone()),
                    None,
                )
                .await
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Err(DedupError::Aborted));
        assert_eq!(second, Ok(2), "second caller must get a fresh run");
        assert!(!overlap.load(Ordering::SeqCst));
    }
}
