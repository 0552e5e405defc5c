//! Error types for task-queue operations.

use thiserror::Error;

use crate::core::state::{MetaStatus, TaskId};

/// Errors produced by the scheduler and the task-queue facade.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A task with this id is already tracked by the queue.
    #[error("task {0} is already queued")]
    DuplicateTask(TaskId),
    /// Submitted task is not in the INIT meta status.
    #[error("task {id} is {status}, only INIT tasks can be queued")]
    NotInit {
        /// Offending task.
        id: TaskId,
        /// Its current meta status.
        status: MetaStatus,
    },
    /// Too many tasks are waiting.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The queue no longer accepts submissions.
    #[error("task queue `{0}` is shut down")]
    Shutdown(String),
    /// A snapshot failed validation.
    #[error("invalid task state: {0}")]
    InvalidState(#[from] StateError),
    /// Meta status would move backwards or stay put.
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Offending task.
        id: TaskId,
        /// Current meta status.
        from: MetaStatus,
        /// Requested meta status.
        to: MetaStatus,
    },
    /// The external worker-pool directory could not be queried.
    #[error("capacity lookup failed: {0}")]
    CapacityUnavailable(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Invariant violations caught while building a [`TaskState`](crate::core::TaskState).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Id 0 is reserved for "not assigned".
    #[error("id must be supplied")]
    MissingId,
    /// Record ids are positive database ids.
    #[error("record id must be > 0, got {0}")]
    InvalidRecordId(i64),
    /// The task type is blank.
    #[error("task type must not be empty")]
    EmptyKind,
    /// The description is blank.
    #[error("description must not be empty")]
    EmptyDescription,
    /// Progress lies outside `[-1, 100]`.
    #[error("progress must be within [-1, 100], got {0}")]
    ProgressOutOfRange(i32),
    /// A lifecycle timestamp disagrees with the meta status.
    #[error("{status} task {reason}")]
    Timestamps {
        /// Meta status being validated.
        status: MetaStatus,
        /// Which rule failed.
        reason: &'static str,
    },
}

/// Result type of task bodies and cleanup hooks.
pub type AppResult<T> = Result<T, anyhow::Error>;
