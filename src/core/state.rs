//! Immutable task snapshots and the builder that produces them.
//!
//! A [`TaskState`] is never mutated in place. Every change (queueing, starting,
//! finishing, progress reports, the abort flag) goes through a
//! [`TaskStateBuilder`] seeded from the previous snapshot, and `build()`
//! re-checks every invariant before the new value is handed out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::error::{SchedulerError, StateError};
use crate::util::clock::Timestamp;

/// Unique task identifier. Zero means "not assigned".
pub type TaskId = u64;

/// Coarse lifecycle classification, orthogonal to a task's domain status.
///
/// Variants are declared in lifecycle order, so `Ord` matches the only
/// permitted direction of travel.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetaStatus {
    /// Created but not yet added to a queue.
    #[default]
    Init,
    /// In the queue waiting for a worker.
    Waiting,
    /// Picked up by a worker.
    Running,
    /// Done, successfully or otherwise. Terminal.
    Finished,
}

impl MetaStatus {
    /// WAITING or RUNNING.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }

    /// Upper-case name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for MetaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(type, recordId)` pair naming the business entity a task acts on,
/// e.g. `("appconvert", 42)` or `("feedscan", 7)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainHandle {
    /// Task type.
    pub kind: String,
    /// Database id of the record being worked on.
    pub record_id: i64,
}

impl DomainHandle {
    /// Build a handle.
    pub fn new(kind: impl Into<String>, record_id: i64) -> Self {
        Self {
            kind: kind.into(),
            record_id,
        }
    }
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.record_id)
    }
}

/// Hands out task ids. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct TaskIdSupplier {
    next: AtomicU64,
}

impl TaskIdSupplier {
    /// Supplier whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next unused id.
    pub fn next_id(&self) -> TaskId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TaskIdSupplier {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of one task's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    id: TaskId,
    record_id: i64,
    #[serde(rename = "type")]
    kind: String,
    description: String,
    status_link: Option<String>,
    status: String,
    meta_status: MetaStatus,
    progress: i32,
    queued: Option<Timestamp>,
    started: Option<Timestamp>,
    finished: Option<Timestamp>,
    aborted: bool,
    datastore_id: Option<i64>,
}

impl TaskState {
    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Id of the record the task operates on.
    #[must_use]
    pub const fn record_id(&self) -> i64 {
        self.record_id
    }

    /// Task type, identical for every task of the same kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Short human-readable purpose of the task.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Relative link (e.g. `/builds/edit/123`) the status should point at.
    #[must_use]
    pub fn status_link(&self) -> Option<&str> {
        self.status_link.as_deref()
    }

    /// Domain-specific status word (DOWNLOADING, CONVERTING, ...).
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Coarse lifecycle status.
    #[must_use]
    pub const fn meta_status(&self) -> MetaStatus {
        self.meta_status
    }

    /// Percent complete, or -1 when unknown.
    #[must_use]
    pub const fn progress(&self) -> i32 {
        self.progress
    }

    /// When the task entered WAITING.
    #[must_use]
    pub const fn queued(&self) -> Option<Timestamp> {
        self.queued
    }

    /// When the task entered RUNNING. Stays unset for tasks aborted while waiting.
    #[must_use]
    pub const fn started(&self) -> Option<Timestamp> {
        self.started
    }

    /// When the task entered FINISHED.
    #[must_use]
    pub const fn finished(&self) -> Option<Timestamp> {
        self.finished
    }

    /// Whether an abort was requested. Says nothing about whether the body noticed.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Datastore the task writes to, if any.
    #[must_use]
    pub const fn datastore_id(&self) -> Option<i64> {
        self.datastore_id
    }

    /// The `(type, recordId)` handle.
    #[must_use]
    pub fn handle(&self) -> DomainHandle {
        DomainHandle::new(self.kind.clone(), self.record_id)
    }

    /// Builder initialised with every field of this snapshot.
    #[must_use]
    pub fn to_builder(&self) -> TaskStateBuilder {
        TaskStateBuilder {
            id: Some(self.id),
            record_id: Some(self.record_id),
            kind: self.kind.clone(),
            description: Some(self.description.clone()),
            status_link: self.status_link.clone(),
            status: self.status.clone(),
            meta_status: self.meta_status,
            progress: self.progress,
            queued: self.queued,
            started: self.started,
            finished: self.finished,
            aborted: self.aborted,
            datastore_id: self.datastore_id,
        }
    }

    /// Successor snapshot in meta status `to`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `to` is strictly later than the current
    /// status; `InvalidState` if the result breaks a snapshot invariant (for
    /// example WAITING -> FINISHED without the abort flag).
    pub fn advance(&self, to: MetaStatus, now: Timestamp) -> Result<Self, SchedulerError> {
        if to <= self.meta_status {
            return Err(SchedulerError::InvalidTransition {
                id: self.id,
                from: self.meta_status,
                to,
            });
        }
        let builder = self.to_builder().with_meta_status(to);
        let builder = match to {
            MetaStatus::Init => builder,
            MetaStatus::Waiting => builder.with_queued(now),
            MetaStatus::Running => builder.with_started(now),
            MetaStatus::Finished => builder.with_finished(now),
        };
        Ok(builder.build()?)
    }
}

/// Staged builder for [`TaskState`].
///
/// ```
/// use taskq_engine::core::{MetaStatus, TaskIdSupplier, TaskStateBuilder};
///
/// let ids = TaskIdSupplier::new();
/// let state = TaskStateBuilder::new("appconvert")
///     .with_new_id(&ids)
///     .with_record_id(42)
///     .with_description("Convert Firefox")
///     .with_status("queued")
///     .build()
///     .unwrap();
/// assert_eq!(state.meta_status(), MetaStatus::Init);
/// assert_eq!(state.progress(), -1);
/// ```
#[derive(Debug, Clone)]
pub struct TaskStateBuilder {
    id: Option<TaskId>,
    record_id: Option<i64>,
    kind: String,
    description: Option<String>,
    status_link: Option<String>,
    status: String,
    meta_status: MetaStatus,
    progress: i32,
    queued: Option<Timestamp>,
    started: Option<Timestamp>,
    finished: Option<Timestamp>,
    aborted: bool,
    datastore_id: Option<i64>,
}

impl TaskStateBuilder {
    /// Start a snapshot of the given task type, in INIT with unknown progress.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            record_id: None,
            kind: kind.into(),
            description: None,
            status_link: None,
            status: String::new(),
            meta_status: MetaStatus::Init,
            progress: -1,
            queued: None,
            started: None,
            finished: None,
            aborted: false,
            datastore_id: None,
        }
    }

    /// Set an explicit id.
    #[must_use]
    pub const fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Take the next id from `ids`.
    #[must_use]
    pub fn with_new_id(self, ids: &TaskIdSupplier) -> Self {
        self.with_id(ids.next_id())
    }

    /// Record the task operates on.
    #[must_use]
    pub const fn with_record_id(mut self, record_id: i64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    /// Short purpose of the task. Should not change over its lifetime.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Relative link the status points at.
    #[must_use]
    pub fn with_status_link(mut self, link: Option<String>) -> Self {
        self.status_link = link;
        self
    }

    /// Domain-specific status word.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Meta status.
    #[must_use]
    pub const fn with_meta_status(mut self, meta_status: MetaStatus) -> Self {
        self.meta_status = meta_status;
        self
    }

    /// Time the task entered WAITING.
    #[must_use]
    pub const fn with_queued(mut self, at: Timestamp) -> Self {
        self.queued = Some(at);
        self
    }

    /// Time the task entered RUNNING.
    #[must_use]
    pub const fn with_started(mut self, at: Timestamp) -> Self {
        self.started = Some(at);
        self
    }

    /// Time the task entered FINISHED.
    #[must_use]
    pub const fn with_finished(mut self, at: Timestamp) -> Self {
        self.finished = Some(at);
        self
    }

    /// Percent complete, -1 for unknown.
    #[must_use]
    pub const fn with_progress(mut self, percent: i32) -> Self {
        self.progress = percent;
        self
    }

    /// Abort flag.
    #[must_use]
    pub const fn with_aborted(mut self, aborted: bool) -> Self {
        self.aborted = aborted;
        self
    }

    /// Datastore the task writes to.
    #[must_use]
    pub const fn with_datastore_id(mut self, datastore_id: Option<i64>) -> Self {
        self.datastore_id = datastore_id;
        self
    }

    /// Current progress value held by the builder.
    #[must_use]
    pub const fn progress(&self) -> i32 {
        self.progress
    }

    /// Copy the lifecycle fields of `current` over whatever the builder holds.
    /// Lets task bodies edit status and progress without touching identity,
    /// meta status, timestamps or the abort flag.
    pub(crate) fn with_lifecycle_of(mut self, current: &TaskState) -> Self {
        self.id = Some(current.id);
        self.record_id = Some(current.record_id);
        self.kind.clone_from(&current.kind);
        self.meta_status = current.meta_status;
        self.queued = current.queued;
        self.started = current.started;
        self.finished = current.finished;
        self.aborted = current.aborted;
        self
    }

    /// Validate and produce the snapshot.
    ///
    /// # Errors
    ///
    /// Any [`StateError`]: missing id, record id not positive, empty type or
    /// description, progress outside `[-1, 100]`, or timestamps that do not
    /// match the meta status.
    pub fn build(self) -> Result<TaskState, StateError> {
        let id = match self.id {
            Some(id) if id != 0 => id,
            _ => return Err(StateError::MissingId),
        };
        let record_id = self.record_id.unwrap_or_default();
        if record_id <= 0 {
            return Err(StateError::InvalidRecordId(record_id));
        }
        if self.kind.trim().is_empty() {
            return Err(StateError::EmptyKind);
        }
        let description = match self.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => return Err(StateError::EmptyDescription),
        };
        if !(-1..=100).contains(&self.progress) {
            return Err(StateError::ProgressOutOfRange(self.progress));
        }
        check_timestamps(
            self.meta_status,
            self.queued,
            self.started,
            self.finished,
            self.aborted,
        )?;

        Ok(TaskState {
            id,
            record_id,
            kind: self.kind,
            description,
            status_link: self.status_link,
            status: self.status,
            meta_status: self.meta_status,
            progress: self.progress,
            queued: self.queued,
            started: self.started,
            finished: self.finished,
            aborted: self.aborted,
            datastore_id: self.datastore_id,
        })
    }
}

fn check_timestamps(
    status: MetaStatus,
    queued: Option<Timestamp>,
    started: Option<Timestamp>,
    finished: Option<Timestamp>,
    aborted: bool,
) -> Result<(), StateError> {
    let fail = |reason| Err(StateError::Timestamps { status, reason });
    match status {
        MetaStatus::Init => {
            if queued.is_some() || started.is_some() || finished.is_some() {
                return fail("must not carry lifecycle timestamps");
            }
        }
        MetaStatus::Waiting => {
            if queued.is_none() {
                return fail("must have a queued time");
            }
            if started.is_some() || finished.is_some() {
                return fail("must not have started or finished");
            }
        }
        MetaStatus::Running => {
            if queued.is_none() || started.is_none() {
                return fail("must have queued and started times");
            }
            if finished.is_some() {
                return fail("must not have finished");
            }
        }
        MetaStatus::Finished => {
            if queued.is_none() || finished.is_none() {
                return fail("must have queued and finished times");
            }
            if started.is_none() && !aborted {
                return fail("can only skip RUNNING when aborted");
            }
        }
    }
    Ok(())
}
