//! Public task-queue facade.
//!
//! A [`TaskQueue`] composes the orderable work queue, the worker pool, the
//! finished-task retention buffer and the task registry, and owns event
//! publication and presentation ordering.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskq_engine::config::TaskQueueConfig;
//! use taskq_engine::core::{FixedCapacity, Task, TaskQueue};
//!
//! let queue = TaskQueue::new(TaskQueueConfig::new("conversions"), Arc::new(FixedCapacity(4)))?;
//! queue.subscribe(Arc::new(|event: &TaskEvent| println!("{}", event.kind())));
//! let queued = queue.add_task(Task::new(state, ConvertBody::new(app)))?;
//! queue.move_to_head(queued.id());
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::TaskQueueConfig;
use crate::core::capacity::{
    CapacityRefresher, CapacitySupplier, ConcurrencyLimit, WorkpoolCapacity, WorkpoolDirectory,
};
use crate::core::error::SchedulerError;
use crate::core::events::{TaskEvent, TaskEventListener};
use crate::core::filter::{self, TaskFilter};
use crate::core::ordering::presentation_order;
use crate::core::scheduler::{QueueStats, SchedulerCore};
use crate::core::state::{DomainHandle, MetaStatus, TaskId, TaskState};
use crate::core::task::Task;
use crate::infra::queue::OrderableWorkQueue;

/// Concurrent, reorderable task queue.
pub struct TaskQueue {
    core: Arc<SchedulerCore>,
    refresher: CapacityRefresher,
}

impl TaskQueue {
    /// Create the queue, start one worker and start the capacity refresher.
    ///
    /// The concurrency bound is 1 until `capacity` has been evaluated once on
    /// the refresher thread. `capacity` alone decides the bound;
    /// `config.max_concurrent` is not consulted here. Use
    /// [`from_config`](Self::from_config) to have it honoured.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` fails validation, `Backend` if a thread
    /// cannot be spawned.
    pub fn new(
        config: TaskQueueConfig,
        capacity: Arc<dyn CapacitySupplier>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let core = Arc::new(SchedulerCore::new(config.clone()));
        core.resize(1);

        let weak = Arc::downgrade(&core);
        let refresher = CapacityRefresher::spawn(
            &config.name,
            capacity,
            config.capacity_refresh(),
            move |raw| {
                let Some(core) = weak.upgrade() else {
                    return false;
                };
                if !core.is_accepting() {
                    return false;
                }
                core.resize(raw);
                true
            },
        );
        let refresher = match refresher {
            Ok(refresher) => refresher,
            Err(e) => {
                core.stop_accepting();
                return Err(e);
            }
        };

        info!(
            queue = %config.name,
            max_concurrent = config.max_concurrent,
            max_finished = config.max_finished,
            max_workers = config.max_workers,
            "Task queue created"
        );
        Ok(Self { core, refresher })
    }

    /// Create the queue with its bound taken from `config.max_concurrent`,
    /// or derived from `directory` when that value is negative.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(
        config: TaskQueueConfig,
        directory: Arc<dyn WorkpoolDirectory>,
    ) -> Result<Self, SchedulerError> {
        let limit = ConcurrencyLimit::new(config.max_concurrent);
        Self::new(config, Arc::new(WorkpoolCapacity::new(limit, directory)))
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Queue an INIT task. Returns its WAITING snapshot and publishes `Added`.
    ///
    /// # Errors
    ///
    /// `NotInit` if the snapshot is past INIT, `DuplicateTask` if the id is
    /// already tracked, `QueueFull` past the depth limit, `Shutdown` after
    /// shutdown began.
    pub fn add_task(&self, task: Task) -> Result<TaskState, SchedulerError> {
        self.core.submit(task)
    }

    /// Every tracked task: FINISHED by finish time, then RUNNING by start
    /// time, then WAITING in queue order.
    #[must_use]
    pub fn get_all_tasks(&self) -> Vec<TaskState> {
        let entries = self.core.lock().positioned();
        presentation_order(entries)
    }

    /// Tasks accepted by `filter`, in [`get_all_tasks`](Self::get_all_tasks) order.
    pub fn get_tasks(&self, filter: impl TaskFilter) -> Vec<TaskState> {
        let mut tasks = self.get_all_tasks();
        tasks.retain(|t| filter.matches(t));
        tasks
    }

    /// Latest snapshot of `id`.
    #[must_use]
    pub fn find_task_by_id(&self, id: TaskId) -> Option<TaskState> {
        self.core.lock().registry.find_by_id(id).map(|t| t.snapshot())
    }

    /// WAITING and RUNNING tasks for one domain entity.
    #[must_use]
    pub fn find_active_tasks_for(&self, handle: &DomainHandle) -> Vec<TaskState> {
        self.core
            .lock()
            .registry
            .find_by_handle(handle)
            .iter()
            .map(|t| t.snapshot())
            .filter(|s| s.meta_status().is_active())
            .collect()
    }

    /// WAITING and RUNNING tasks of any of `kinds` for `record_id`. Repeated
    /// kinds are looked up once.
    #[must_use]
    pub fn find_active_tasks_for_record(&self, kinds: &[&str], record_id: i64) -> Vec<TaskState> {
        let kinds: BTreeSet<&str> = kinds.iter().copied().collect();
        let st = self.core.lock();
        kinds
            .iter()
            .flat_map(|kind| st.registry.find_by_handle(&DomainHandle::new(*kind, record_id)))
            .map(|t| t.snapshot())
            .filter(|s| s.meta_status().is_active())
            .collect()
    }

    /// Number of WAITING and RUNNING tasks attached to datastore `id`.
    #[must_use]
    pub fn count_active_tasks_by_datastore_id(&self, id: i64) -> usize {
        let datastore = filter::with_datastore(id);
        let active = filter::not_finished();
        self.core
            .lock()
            .registry
            .get_all()
            .map(|t| t.snapshot())
            .filter(|s| datastore(s) && active(s))
            .count()
    }

    /// Abort a task. A WAITING task finishes at once without running; a
    /// RUNNING task is flagged and its body asked to cancel. Returns the
    /// latest snapshot, or `None` if the id is not tracked.
    pub fn abort_task(&self, id: TaskId) -> Option<TaskState> {
        self.core.abort(id)
    }

    /// Abort all WAITING tasks, then all RUNNING ones. Returns how many were touched.
    pub fn abort_all_tasks(&self) -> usize {
        info!(queue = %self.name(), "Aborting all tasks");
        self.core.abort_all()
    }

    /// Move a WAITING task to the head of the line. `false` for any other task.
    pub fn move_to_head(&self, id: TaskId) -> bool {
        self.reorder(id, |q| q.move_to_head(&id), |task| TaskEvent::MovedToHead { task })
    }

    /// Move a WAITING task to the tail of the line. `false` for any other task.
    pub fn move_to_tail(&self, id: TaskId) -> bool {
        self.reorder(id, |q| q.move_to_tail(&id), |task| TaskEvent::MovedToTail { task })
    }

    /// Move a WAITING task so it runs right after `anchor_id`, ahead of
    /// everything that followed the anchor. `false` unless both are WAITING
    /// and distinct.
    pub fn move_before(&self, id: TaskId, anchor_id: TaskId) -> bool {
        self.reorder(
            id,
            |q| q.move_after(&id, &anchor_id),
            |task| TaskEvent::MovedAfter { task, anchor_id },
        )
    }

    fn reorder(
        &self,
        id: TaskId,
        op: impl FnOnce(&mut OrderableWorkQueue<TaskId>) -> bool,
        event: impl FnOnce(TaskState) -> TaskEvent,
    ) -> bool {
        {
            let mut st = self.core.lock();
            let Some(state) = st.registry.find_by_id(id).map(|t| t.snapshot()) else {
                return false;
            };
            if state.meta_status() != MetaStatus::Waiting || !op(&mut st.pending) {
                return false;
            }
            let event = event(state);
            debug!(queue = %self.name(), task_id = id, event = event.kind(), "Task moved");
            // Sequenced under the lock, ahead of the RUNNING update.
            self.core.events.enqueue(event);
        }
        self.core.events.dispatch();
        true
    }

    /// Flush every retained finished task: cleanup hook, unregister,
    /// `Removed`. Returns the number flushed.
    pub fn cleanup(&self) -> usize {
        info!(queue = %self.name(), "Purging completed tasks");
        self.core.flush_finished()
    }

    /// Flush one task if it is FINISHED. `false` otherwise.
    pub fn cleanup_task(&self, id: TaskId) -> bool {
        self.core.flush_one(id)
    }

    /// Ask the task body to reset its stall detection. Returns the latest
    /// snapshot if the body supports it.
    pub fn unstall_task(&self, id: TaskId) -> Option<TaskState> {
        let task = self.core.lock().registry.find_by_id(id).cloned()?;
        if task.body.unstall() {
            debug!(queue = %self.name(), task_id = id, "Task unstalled");
            Some(task.snapshot())
        } else {
            None
        }
    }

    /// Current counters and sizes.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.core.stats()
    }

    /// Re-evaluate the capacity supplier on the refresher thread. Never blocks.
    pub fn notify_config_changed(&self) {
        self.refresher.notify();
    }

    /// Set the concurrency bound directly. Clamped to `[1, max_workers]`;
    /// running tasks are not disturbed. The next capacity refresh may
    /// override it.
    pub fn resize(&self, new_max: i64) {
        self.core.resize(new_max);
    }

    /// Register an event listener.
    pub fn subscribe(&self, listener: Arc<dyn TaskEventListener>) {
        self.core.events.subscribe(listener);
    }

    /// Stop accepting tasks, abort everything if `abort`, wait for the
    /// shutdown grace window, then force-cancel what is left. Returns the
    /// snapshots of force-cancelled tasks.
    pub fn graceful_shutdown(&self, abort: bool) -> Vec<TaskState> {
        let unfinished = self.core.graceful_shutdown(abort);
        self.refresher.stop(true);
        unfinished
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Workers drain the queue and exit on their own; nothing is joined here.
        if self.core.stop_accepting() {
            debug!(queue = %self.name(), "Task queue dropped without shutdown, detaching workers");
        }
        self.refresher.stop(false);
    }
}
