//! Index of tracked tasks by id and by domain handle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::SchedulerError;
use crate::core::state::{DomainHandle, TaskId};
use crate::core::task::TrackedTask;

/// Authoritative index of every WAITING, RUNNING and retained FINISHED task.
///
/// Not synchronized; it lives inside the scheduler state, so `record` and
/// `erase` update both indices under one lock.
pub(crate) struct TaskRegistry {
    by_id: HashMap<TaskId, Arc<TrackedTask>>,
    by_handle: HashMap<DomainHandle, Vec<Arc<TrackedTask>>>,
    per_handle: usize,
}

impl TaskRegistry {
    pub fn new(expected_size: usize, per_handle: usize) -> Self {
        Self {
            by_id: HashMap::with_capacity(expected_size),
            by_handle: HashMap::with_capacity(expected_size),
            per_handle: per_handle.max(1),
        }
    }

    /// Track `task`. One entry per id.
    pub fn record(&mut self, task: Arc<TrackedTask>) -> Result<(), SchedulerError> {
        if self.by_id.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        let handle = task.snapshot().handle();
        let per_handle = self.per_handle;
        self.by_handle
            .entry(handle)
            .or_insert_with(|| Vec::with_capacity(per_handle))
            .push(Arc::clone(&task));
        self.by_id.insert(task.id, task);
        Ok(())
    }

    /// Stop tracking `id`. Returns the removed task.
    pub fn erase(&mut self, id: TaskId) -> Option<Arc<TrackedTask>> {
        let task = self.by_id.remove(&id)?;
        let handle = task.snapshot().handle();
        if let Some(tasks) = self.by_handle.get_mut(&handle) {
            tasks.retain(|t| t.id != id);
            if tasks.is_empty() {
                self.by_handle.remove(&handle);
            }
        }
        Some(task)
    }

    /// Every tracked task, in no particular order.
    pub fn get_all(&self) -> impl Iterator<Item = &Arc<TrackedTask>> {
        self.by_id.values()
    }

    pub fn find_by_id(&self, id: TaskId) -> Option<&Arc<TrackedTask>> {
        self.by_id.get(&id)
    }

    /// Tasks for one domain entity, oldest submission first.
    pub fn find_by_handle(&self, handle: &DomainHandle) -> &[Arc<TrackedTask>] {
        self.by_handle.get(handle).map(Vec::as_slice).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
