//! Deadline race
//!
//! Conversion work cannot be preempted: a worker has no forced-interrupt
//! primitive. [`race`] therefore bounds only the latency the caller sees.
//! When the deadline fires first, the task context is marked abandoned and
//! the caller is answered immediately, while the work keeps running on its
//! own task until it notices abandonment at a checkpoint and cleans up.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ConversionError, WorkerError};

/// Per-task state shared between the caller and the work
///
/// Clones share the same abandoned flag.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task identifier, used for log correlation
    pub task_id: Uuid,

    /// Time budget for the task
    pub deadline: Duration,

    started_at: Instant,
    abandoned: CancellationToken,
}

impl TaskContext {
    /// Create a context for a task with the given time budget
    pub fn new(task_id: Uuid, deadline: Duration) -> Self {
        Self {
            task_id,
            deadline,
            started_at: Instant::now(),
            abandoned: CancellationToken::new(),
        }
    }

    /// Whether the deadline fired while the work was still in flight
    ///
    /// Work must check this at each safe point and stop producing side
    /// effects once it is set.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.is_cancelled()
    }

    /// Resolves once the task has been abandoned
    pub async fn abandoned(&self) {
        self.abandoned.cancelled().await
    }

    /// Mark the task abandoned
    pub fn abandon(&self) {
        self.abandoned.cancel();
    }

    /// Time elapsed since the context was created
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Result of racing work against a deadline
///
/// Exactly one side settles the outcome; the loser's value is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    /// The work finished first
    Completed(T),
    /// The deadline elapsed first; the work was abandoned
    TimedOut,
    /// The work task was cancelled by the runtime before finishing
    Aborted,
}

impl<T> RaceOutcome<T> {
    /// Whether the deadline won
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Run `work` on its own task and race it against `ctx.deadline`
///
/// A panic inside the work is propagated to the caller.
pub async fn race<T, F, Fut>(ctx: &TaskContext, work: F) -> RaceOutcome<T>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(work(ctx.clone()));
    let timer = tokio::time::sleep(ctx.deadline);

    tokio::select! {
        biased;

        joined = &mut handle => match joined {
            Ok(value) => RaceOutcome::Completed(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "Conversion task aborted");
                ctx.abandon();
                RaceOutcome::Aborted
            }
        },
        _ = timer => {
            ctx.abandon();
            debug!(
                task_id = %ctx.task_id,
                deadline_ms = ctx.deadline.as_millis() as u64,
                "Deadline elapsed, abandoning work"
            );
            // Dropping the handle detaches the work; its result is discarded
            RaceOutcome::TimedOut
        }
    }
}

/// [`race`] specialised to fallible work, mapping the deadline to
/// [`ConversionError::Timeout`] with `message`
pub async fn run_with_timeout<T, F, Fut>(
    ctx: &TaskContext,
    message: impl Into<String>,
    work: F,
) -> Result<T, ConversionError>
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = Result<T, ConversionError>> + Send + 'static,
    T: Send + 'static,
{
    match race(ctx, work).await {
        RaceOutcome::Completed(result) => result,
        RaceOutcome::TimedOut => Err(ConversionError::timeout(message)),
        RaceOutcome::Aborted => Err(ConversionError::Worker(WorkerError::Protocol(
            "conversion task aborted".to_string(),
        ))),
    }
}

/// Deadline for a request: it may shorten, never extend, the configured one
pub fn effective_timeout(configured: Duration, requested: Option<Duration>) -> Duration {
    match requested {
        Some(requested) if !requested.is_zero() => configured.min(requested),
        _ => configured,
    }
}
