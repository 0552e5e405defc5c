//! Task bodies, cancellation handles and the context a running body sees.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::error::{AppResult, SchedulerError};
use crate::core::events::{EventBus, TaskEvent};
use crate::core::state::{MetaStatus, TaskId, TaskState, TaskStateBuilder};
use crate::util::clock::Timestamp;

/// The work a task performs.
///
/// Bodies run on a dedicated worker thread inside that thread's
/// single-threaded tokio runtime, so blocking inside `run` only occupies the
/// task's own slot. Cancellation is observed at `.await` points; a body that
/// polls an external job should await between polls.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use taskq_engine::core::{AppResult, TaskBody, TaskContext};
///
/// struct Convert;
///
/// #[async_trait]
/// impl TaskBody for Convert {
///     async fn run(&self, ctx: TaskContext) -> AppResult<()> {
///         ctx.update_status("DOWNLOADING")?;
///         download().await?;
///         ctx.update_status_with_progress("CONVERTING", 50)?;
///         convert().await?;
///         ctx.update_progress(100)?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Do the work. Errors are logged and counted; they never reach sibling tasks.
    async fn run(&self, ctx: TaskContext) -> AppResult<()>;

    /// Release resources held on behalf of the task. Called once, when the
    /// finished task is evicted or flushed. Failures are logged.
    fn cleanup(&self, _state: &TaskState) -> AppResult<()> {
        Ok(())
    }

    /// Reset the body's own stall detection. Returns `false` if unsupported.
    fn unstall(&self) -> bool {
        false
    }
}

/// A task ready for submission: an INIT snapshot plus its body.
pub struct Task {
    pub(crate) state: TaskState,
    pub(crate) body: Arc<dyn TaskBody>,
}

impl Task {
    /// Pair a snapshot with the body that will run it.
    pub fn new(state: TaskState, body: impl TaskBody) -> Self {
        Self {
            state,
            body: Arc::new(body),
        }
    }

    /// Same as [`Task::new`] for bodies that are already shared.
    pub fn from_arc(state: TaskState, body: Arc<dyn TaskBody>) -> Self {
        Self { state, body }
    }

    /// Snapshot as submitted.
    #[must_use]
    pub const fn state(&self) -> &TaskState {
        &self.state
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("state", &self.state).finish_non_exhaustive()
    }
}

/// Best-effort interruption request for one running task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|c| *c).await;
    }
}

/// Scheduler-side record of one task. The registry owns these.
pub(crate) struct TrackedTask {
    pub id: TaskId,
    state: Mutex<TaskState>,
    aborted: AtomicBool,
    pub body: Arc<dyn TaskBody>,
}

impl TrackedTask {
    pub fn new(task: Task) -> Self {
        Self {
            id: task.state.id(),
            aborted: AtomicBool::new(task.state.is_aborted()),
            state: Mutex::new(task.state),
            body: task.body,
        }
    }

    pub fn snapshot(&self) -> TaskState {
        self.state.lock().clone()
    }

    pub fn meta_status(&self) -> MetaStatus {
        self.state.lock().meta_status()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Set the abort flag and fold it into the snapshot. Returns the new
    /// snapshot; `Updated` is enqueued only if the flag was not already set.
    pub fn mark_aborted(&self, events: &EventBus) -> Result<TaskState, SchedulerError> {
        self.aborted.store(true, Ordering::Release);
        let mut state = self.state.lock();
        if !state.is_aborted() {
            *state = state.to_builder().with_aborted(true).build()?;
            events.enqueue(TaskEvent::Updated {
                task: state.clone(),
            });
        }
        Ok(state.clone())
    }

    /// Move to `to` and enqueue the matching event: `Added` on entering
    /// WAITING, `Updated` otherwise.
    pub fn advance(
        &self,
        to: MetaStatus,
        now: Timestamp,
        events: &EventBus,
    ) -> Result<TaskState, SchedulerError> {
        let mut state = self.state.lock();
        *state = state.advance(to, now)?;
        let task = state.clone();
        events.enqueue(if to == MetaStatus::Waiting {
            TaskEvent::Added { task }
        } else {
            TaskEvent::Updated { task }
        });
        Ok(state.clone())
    }

    /// Flag and finish a task that never ran, as one snapshot change.
    pub fn finish_aborted(
        &self,
        now: Timestamp,
        events: &EventBus,
    ) -> Result<TaskState, SchedulerError> {
        self.aborted.store(true, Ordering::Release);
        let mut state = self.state.lock();
        let flagged = state.to_builder().with_aborted(true).build()?;
        *state = flagged.advance(MetaStatus::Finished, now)?;
        events.enqueue(TaskEvent::Updated {
            task: state.clone(),
        });
        Ok(state.clone())
    }

    /// Apply a body-initiated edit. `None` when nothing changed.
    pub fn update_with(
        &self,
        edit: impl FnOnce(TaskStateBuilder) -> TaskStateBuilder,
        events: &EventBus,
    ) -> Result<Option<TaskState>, SchedulerError> {
        let mut state = self.state.lock();
        let next = edit(state.to_builder()).with_lifecycle_of(&state).build()?;
        if next == *state {
            return Ok(None);
        }
        *state = next;
        events.enqueue(TaskEvent::Updated {
            task: state.clone(),
        });
        Ok(Some(state.clone()))
    }
}

/// Handle given to a running [`TaskBody`].
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<TrackedTask>,
    cancel: CancelHandle,
    events: EventBus,
}

impl TaskContext {
    pub(crate) fn new(task: Arc<TrackedTask>, cancel: CancelHandle, events: EventBus) -> Self {
        Self {
            task,
            cancel,
            events,
        }
    }

    /// Id of the running task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// Latest snapshot.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.task.snapshot()
    }

    /// Whether an abort was requested. Long-running bodies should check this
    /// between steps.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.task.is_aborted() || self.cancel.is_cancelled()
    }

    /// Resolves when the task is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Set the domain status.
    ///
    /// # Errors
    ///
    /// Never in practice; the edit cannot break an invariant.
    pub fn update_status(&self, status: impl Into<String>) -> Result<TaskState, SchedulerError> {
        let status = status.into();
        self.update_state(|b| b.with_status(status))
    }

    /// Set the progress percentage.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `percent` is outside `[-1, 100]`.
    pub fn update_progress(&self, percent: i32) -> Result<TaskState, SchedulerError> {
        self.update_state(|b| b.with_progress(percent))
    }

    /// Set status and progress in one snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `percent` is outside `[-1, 100]`.
    pub fn update_status_with_progress(
        &self,
        status: impl Into<String>,
        percent: i32,
    ) -> Result<TaskState, SchedulerError> {
        let status = status.into();
        self.update_state(|b| b.with_status(status).with_progress(percent))
    }

    /// Add `delta` to the progress, treating unknown progress as 0 and capping at 100.
    ///
    /// # Errors
    ///
    /// Never in practice; the result is clamped.
    pub fn increment_progress_by(&self, delta: i32) -> Result<TaskState, SchedulerError> {
        self.update_state(|b| {
            let next = b.progress().max(0).saturating_add(delta).clamp(0, 100);
            b.with_progress(next)
        })
    }

    /// Edit the snapshot through its builder. Identity, meta status, timestamps
    /// and the abort flag are restored after `edit` runs. Publishes `Updated`
    /// before returning when something changed.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the edited snapshot fails validation; the previous
    /// snapshot is kept.
    pub fn update_state(
        &self,
        edit: impl FnOnce(TaskStateBuilder) -> TaskStateBuilder,
    ) -> Result<TaskState, SchedulerError> {
        match self.task.update_with(edit, &self.events)? {
            Some(state) => {
                self.events.dispatch();
                Ok(state)
            }
            None => Ok(self.task.snapshot()),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.task.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
