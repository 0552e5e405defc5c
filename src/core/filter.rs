//! Snapshot predicates for `TaskQueue::get_tasks`.

use crate::core::state::{MetaStatus, TaskState};

/// Anything that can accept or reject a snapshot.
pub trait TaskFilter {
    /// `true` to keep the snapshot.
    fn matches(&self, state: &TaskState) -> bool;
}

impl<F> TaskFilter for F
where
    F: Fn(&TaskState) -> bool,
{
    fn matches(&self, state: &TaskState) -> bool {
        self(state)
    }
}

/// Tasks in any of `statuses`.
pub fn with_meta_status(statuses: &[MetaStatus]) -> impl Fn(&TaskState) -> bool + '_ {
    move |s| statuses.contains(&s.meta_status())
}

/// WAITING tasks.
pub fn waiting() -> impl Fn(&TaskState) -> bool {
    |s| s.meta_status() == MetaStatus::Waiting
}

/// RUNNING tasks.
pub fn running() -> impl Fn(&TaskState) -> bool {
    |s| s.meta_status() == MetaStatus::Running
}

/// FINISHED tasks.
pub fn finished() -> impl Fn(&TaskState) -> bool {
    |s| s.meta_status() == MetaStatus::Finished
}

/// WAITING or RUNNING tasks.
pub fn not_finished() -> impl Fn(&TaskState) -> bool {
    |s| s.meta_status().is_active()
}

/// Tasks attached to datastore `id`.
pub fn with_datastore(id: i64) -> impl Fn(&TaskState) -> bool {
    move |s| s.datastore_id() == Some(id)
}
