//! Bounded worker pool pulling from an orderable queue.
//!
//! All queue, registry, retention and worker bookkeeping lives behind one
//! `parking_lot` mutex. Critical sections never run task code: bodies run on
//! worker threads with the lock released. Events and evictions are
//! sequenced on the event outbox inside the critical section that caused
//! them; cleanup hooks and listeners run after the lock is dropped.
//!
//! Workers are dedicated OS threads, each driving its own current-thread tokio
//! runtime. The pool grows and shrinks with the capacity bound: surplus
//! workers retire the next time they look for work, so a shrink never
//! interrupts a running body.

mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::TaskQueueConfig;
use crate::core::capacity::effective_bound;
use crate::core::error::SchedulerError;
use crate::core::events::EventBus;
use crate::core::ordering::Positioned;
use crate::core::registry::TaskRegistry;
use crate::core::state::{MetaStatus, TaskId, TaskState};
use crate::core::task::{CancelHandle, Task, TrackedTask};
use crate::infra::queue::OrderableWorkQueue;
use crate::infra::retention::FinishedRetentionBuffer;
use crate::util::clock::now_ms;

/// Point-in-time statistics of one task queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Current concurrency bound.
    pub max_concurrency: usize,
    /// Worker threads alive, busy or idle.
    pub live_workers: usize,
    /// Tasks waiting in the queue.
    pub waiting: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Finished tasks still retained.
    pub retained_finished: usize,
    /// Tasks accepted since creation.
    pub submitted: u64,
    /// Bodies that returned `Ok`.
    pub completed: u64,
    /// Bodies that returned an error or panicked.
    pub failed: u64,
    /// Bodies interrupted by cancellation.
    pub cancelled: u64,
    /// Tasks finished without running because they were aborted while waiting.
    pub aborted_waiting: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub aborted_waiting: AtomicU64,
}

#[derive(Debug)]
struct WorkerSlots {
    /// Current concurrency bound.
    target: usize,
    /// Workers spawned and not yet retired.
    live: usize,
    /// Workers executing a body.
    busy: usize,
    accepting: bool,
    next_worker_id: usize,
}

pub(crate) struct SchedulerState {
    pub registry: TaskRegistry,
    pub pending: OrderableWorkQueue<TaskId>,
    finished: FinishedRetentionBuffer<TaskId>,
    /// Ids the retention buffer let go of, not yet unregistered.
    evicted: Receiver<TaskId>,
    running: HashMap<TaskId, CancelHandle>,
    slots: WorkerSlots,
}

impl SchedulerState {
    /// Every tracked snapshot together with its queue position.
    pub fn positioned(&self) -> Vec<Positioned> {
        let positions: HashMap<TaskId, usize> = self
            .pending
            .iter()
            .enumerate()
            .map(|(at, id)| (*id, at))
            .collect();
        self.registry
            .get_all()
            .map(|t| (t.snapshot(), positions.get(&t.id).copied()))
            .collect()
    }

    /// Abort a queued task in place: take it out of the queue, flag it and
    /// finish it. Returns the final snapshot.
    fn finish_waiting(
        &mut self,
        task: &TrackedTask,
        events: &EventBus,
    ) -> Result<TaskState, SchedulerError> {
        self.pending.remove(&task.id);
        self.retire(task, true, events)
    }

    /// Finish `task` and retain it. Room is made first, so the `Removed` of a
    /// displaced task is sequenced before the new FINISHED snapshot.
    fn retire(
        &mut self,
        task: &TrackedTask,
        aborted: bool,
        events: &EventBus,
    ) -> Result<TaskState, SchedulerError> {
        self.finished.make_room();
        self.settle_evictions(events);
        let state = if aborted {
            task.finish_aborted(now_ms(), events)?
        } else {
            task.advance(MetaStatus::Finished, now_ms(), events)?
        };
        self.finished.push(task.id);
        Ok(state)
    }

    /// Unregister what the retention buffer evicted and sequence each
    /// task's cleanup hook and `Removed` event.
    fn settle_evictions(&mut self, events: &EventBus) {
        while let Ok(id) = self.evicted.try_recv() {
            match self.registry.erase(id) {
                Some(task) => events.enqueue_eviction(Arc::clone(&task.body), task.snapshot()),
                None => error!(task_id = id, "Evicted task was not registered"),
            }
        }
    }
}

/// A task handed to a worker.
pub(crate) struct Job {
    pub task: Arc<TrackedTask>,
    pub cancel: CancelHandle,
}

/// Shared scheduler state. The facade and every worker hold an `Arc` to it.
pub(crate) struct SchedulerCore {
    config: TaskQueueConfig,
    state: Mutex<SchedulerState>,
    /// Signalled when work arrives, the bound changes, or submissions stop.
    work_ready: Condvar,
    /// Signalled when a task finishes or leaves the queue, and when a worker retires.
    idle: Condvar,
    pub events: EventBus,
    counters: QueueCounters,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerCore {
    pub fn new(config: TaskQueueConfig) -> Self {
        let (evicted_tx, evicted) = unbounded::<TaskId>();
        let finished = FinishedRetentionBuffer::new(config.max_finished, move |id: &TaskId| {
            // The receiver lives as long as the buffer's owner.
            let _ = evicted_tx.send(*id);
        });
        let expected = config.max_queue_depth.min(1024);
        let state = SchedulerState {
            registry: TaskRegistry::new(expected, config.expected_tasks_per_record),
            pending: OrderableWorkQueue::new(config.max_queue_depth),
            finished,
            evicted,
            running: HashMap::new(),
            slots: WorkerSlots {
                target: 1,
                live: 0,
                busy: 0,
                accepting: true,
                next_worker_id: 0,
            },
        };
        Self {
            events: EventBus::new(&config.name),
            config,
            state: Mutex::new(state),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            counters: QueueCounters::default(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock()
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().slots.accepting
    }

    /// Queue an INIT task.
    pub fn submit(&self, task: Task) -> Result<TaskState, SchedulerError> {
        let id = task.state.id();
        let status = task.state.meta_status();
        if status != MetaStatus::Init {
            return Err(SchedulerError::NotInit { id, status });
        }
        let tracked = Arc::new(TrackedTask::new(task));
        let queued = {
            let mut st = self.state.lock();
            if !st.slots.accepting {
                return Err(SchedulerError::Shutdown(self.config.name.clone()));
            }
            if st.registry.find_by_id(id).is_some() {
                return Err(SchedulerError::DuplicateTask(id));
            }
            if st.pending.len() >= st.pending.max_depth() {
                return Err(SchedulerError::QueueFull(self.config.name.clone()));
            }
            st.pending.push_back(id)?;
            let queued = tracked.advance(MetaStatus::Waiting, now_ms(), &self.events)?;
            st.registry.record(tracked)?;
            queued
        };
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.config.name, task_id = id, handle = %queued.handle(), "Task queued");
        self.events.dispatch();
        self.work_ready.notify_one();
        Ok(queued)
    }

    /// Apply a new raw capacity value: clamp it, then spawn or retire workers.
    pub fn resize(self: &Arc<Self>, raw: i64) {
        let bound = effective_bound(raw, self.config.max_workers);
        let to_spawn = {
            let mut st = self.state.lock();
            let previous = st.slots.target;
            st.slots.target = bound;
            if previous != bound {
                info!(queue = %self.config.name, from = previous, to = bound, "Resizing worker pool");
            }
            if st.slots.accepting {
                let missing = bound.saturating_sub(st.slots.live);
                st.slots.live += missing;
                missing
            } else {
                0
            }
        };
        // Wake idle workers so the surplus can retire.
        self.work_ready.notify_all();
        for _ in 0..to_spawn {
            self.spawn_worker();
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let worker_id = {
            let mut st = self.state.lock();
            st.slots.next_worker_id += 1;
            st.slots.next_worker_id
        };
        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-worker-{worker_id}", self.config.name))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || worker::run(&core, worker_id));
        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
            }
            Err(e) => {
                error!(queue = %self.config.name, worker_id, error = %e, "Failed to spawn worker thread");
                self.worker_exited();
            }
        }
    }

    /// Release a worker slot without going through `next_job`.
    fn worker_exited(&self) {
        let mut st = self.state.lock();
        st.slots.live = st.slots.live.saturating_sub(1);
        drop(st);
        self.idle.notify_all();
    }

    /// Block until there is a task to run, or return `None` when this worker
    /// should retire. Dequeueing, marking RUNNING and recording the cancel
    /// handle happen in one critical section.
    pub fn next_job(&self, worker_id: usize) -> Option<Job> {
        let mut st = self.state.lock();
        let mut undelivered = false;
        let job = loop {
            if st.slots.live > st.slots.target || (!st.slots.accepting && st.pending.is_empty()) {
                st.slots.live = st.slots.live.saturating_sub(1);
                if !st.pending.is_empty() {
                    self.work_ready.notify_one();
                }
                self.idle.notify_all();
                debug!(queue = %self.config.name, worker_id, "Worker retiring");
                break None;
            }
            let Some(id) = st.pending.pop_front() else {
                if std::mem::take(&mut undelivered) {
                    MutexGuard::unlocked(&mut st, || self.events.dispatch());
                    continue;
                }
                self.work_ready.wait(&mut st);
                continue;
            };
            let Some(task) = st.registry.find_by_id(id).cloned() else {
                error!(queue = %self.config.name, task_id = id, "Queued task is not registered");
                continue;
            };
            if task.is_aborted() {
                match st.retire(&task, true, &self.events) {
                    Ok(_) => {
                        self.counters.aborted_waiting.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => error!(queue = %self.config.name, task_id = id, error = %e, "Failed to finish aborted task"),
                }
                undelivered = true;
                self.idle.notify_all();
                continue;
            }
            match task.advance(MetaStatus::Running, now_ms(), &self.events) {
                Ok(_) => {
                    let cancel = CancelHandle::new();
                    st.running.insert(id, cancel.clone());
                    st.slots.busy += 1;
                    break Some(Job { task, cancel });
                }
                Err(e) => {
                    error!(queue = %self.config.name, task_id = id, error = %e, "Failed to start task");
                }
            }
        };
        drop(st);
        self.events.dispatch();
        job
    }

    /// Record the end of a body: FINISHED, retained, slot released.
    pub fn finish(&self, task: &TrackedTask) {
        let finished = {
            let mut st = self.state.lock();
            st.running.remove(&task.id);
            st.slots.busy = st.slots.busy.saturating_sub(1);
            st.retire(task, false, &self.events)
        };
        self.idle.notify_all();
        if let Err(e) = finished {
            error!(queue = %self.config.name, task_id = task.id, error = %e, "Failed to finish task");
        }
        self.events.dispatch();
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    /// Abort one task. `None` if it is not tracked.
    pub fn abort(&self, id: TaskId) -> Option<TaskState> {
        let (result, changed) = {
            let mut st = self.state.lock();
            let Some(task) = st.registry.find_by_id(id).cloned() else {
                drop(st);
                warn!(queue = %self.config.name, task_id = id, "Abort requested for unknown task");
                return None;
            };
            match task.meta_status() {
                MetaStatus::Finished => (Ok(task.snapshot()), false),
                MetaStatus::Init | MetaStatus::Waiting => {
                    let result = st.finish_waiting(&task, &self.events);
                    if result.is_ok() {
                        self.counters.aborted_waiting.fetch_add(1, Ordering::Relaxed);
                    }
                    (result, true)
                }
                MetaStatus::Running => {
                    let result = task.mark_aborted(&self.events);
                    if let Some(cancel) = st.running.get(&id) {
                        cancel.cancel();
                    }
                    (result, true)
                }
            }
        };
        if !changed {
            return result.ok();
        }
        self.idle.notify_all();
        self.events.dispatch();
        match result {
            Ok(state) => {
                info!(queue = %self.config.name, task_id = id, status = %state.meta_status(), "Task aborted");
                Some(state)
            }
            Err(e) => {
                error!(queue = %self.config.name, task_id = id, error = %e, "Failed to abort task");
                self.state.lock().registry.find_by_id(id).map(|t| t.snapshot())
            }
        }
    }

    /// Abort every WAITING task, then every RUNNING task. Returns how many
    /// tasks were aborted.
    pub fn abort_all(&self) -> usize {
        let waiting: Vec<TaskId> = self.state.lock().pending.iter().copied().collect();
        let mut aborted = 0;
        for id in waiting {
            aborted += usize::from(self.abort(id).is_some());
        }
        let mut running: Vec<TaskId> = self.state.lock().running.keys().copied().collect();
        running.sort_unstable();
        for id in running {
            aborted += usize::from(self.abort(id).is_some());
        }
        aborted
    }

    /// Flush every retained finished task. Returns the number flushed.
    pub fn flush_finished(&self) -> usize {
        let flushed = {
            let mut st = self.state.lock();
            let flushed = st.finished.flush();
            st.settle_evictions(&self.events);
            flushed
        };
        self.events.dispatch();
        flushed
    }

    /// Flush one retained finished task.
    pub fn flush_one(&self, id: TaskId) -> bool {
        let flushed = {
            let mut st = self.state.lock();
            let finished = st
                .registry
                .find_by_id(id)
                .is_some_and(|t| t.meta_status() == MetaStatus::Finished);
            let flushed = finished && st.finished.flush_one(&id);
            st.settle_evictions(&self.events);
            flushed
        };
        self.events.dispatch();
        flushed
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.state.lock();
        QueueStats {
            name: self.config.name.clone(),
            max_concurrency: st.slots.target,
            live_workers: st.slots.live,
            waiting: st.pending.len(),
            running: st.running.len(),
            retained_finished: st.finished.len(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            aborted_waiting: self.counters.aborted_waiting.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work. Idle workers retire once the queue is empty.
    pub fn stop_accepting(&self) -> bool {
        let was_accepting = {
            let mut st = self.state.lock();
            std::mem::replace(&mut st.slots.accepting, false)
        };
        self.work_ready.notify_all();
        was_accepting
    }

    /// Stop accepting, optionally abort everything, wait for the queue to
    /// drain, then force-cancel what is left. Returns the snapshots of the
    /// tasks that were force-cancelled.
    pub fn graceful_shutdown(&self, abort: bool) -> Vec<TaskState> {
        self.stop_accepting();
        info!(queue = %self.config.name, abort, "Shutting down task queue");
        if abort {
            let aborted = self.abort_all();
            debug!(queue = %self.config.name, aborted, "Aborted unfinished tasks");
        }

        let grace = self.config.shutdown_grace();
        let mut unfinished = Vec::new();
        if !self.wait_idle(grace) {
            warn!(queue = %self.config.name, grace_secs = grace.as_secs(), "Tasks still running after grace window, cancelling");
            unfinished = self.force_cancel();
            if !self.wait_idle(grace) {
                error!(queue = %self.config.name, "Tasks did not terminate after cancellation");
            }
        }
        self.join_workers(grace);
        info!(queue = %self.config.name, unfinished = unfinished.len(), "Task queue shut down");
        unfinished
    }

    fn force_cancel(&self) -> Vec<TaskState> {
        let unfinished = {
            let mut st = self.state.lock();
            let mut unfinished = Vec::new();
            for id in st.pending.drain() {
                let Some(task) = st.registry.find_by_id(id).cloned() else {
                    continue;
                };
                match st.finish_waiting(&task, &self.events) {
                    Ok(state) => {
                        self.counters.aborted_waiting.fetch_add(1, Ordering::Relaxed);
                        unfinished.push(state);
                    }
                    Err(e) => error!(queue = %self.config.name, task_id = id, error = %e, "Failed to cancel queued task"),
                }
            }
            let mut running: Vec<(TaskId, CancelHandle)> =
                st.running.iter().map(|(id, c)| (*id, c.clone())).collect();
            running.sort_unstable_by_key(|(id, _)| *id);
            for (id, cancel) in running {
                let Some(task) = st.registry.find_by_id(id).cloned() else {
                    continue;
                };
                match task.mark_aborted(&self.events) {
                    Ok(state) => unfinished.push(state),
                    Err(e) => error!(queue = %self.config.name, task_id = id, error = %e, "Failed to flag running task"),
                }
                cancel.cancel();
            }
            unfinished
        };
        self.idle.notify_all();
        self.events.dispatch();
        unfinished
    }

    /// Wait until nothing is queued or running. `false` on timeout.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        while !(st.pending.is_empty() && st.slots.busy == 0) {
            if self.idle.wait_until(&mut st, deadline).timed_out() {
                return st.pending.is_empty() && st.slots.busy == 0;
            }
        }
        true
    }

    /// Join worker threads, detaching any that do not exit within `timeout`.
    fn join_workers(&self, timeout: Duration) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        let count = workers.len();
        for handle in workers {
            let worker = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.thread().id() == current {
                warn!(queue = %self.config.name, worker = %worker, "Shutdown called from a worker thread, not joining it");
                continue;
            }
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(handle.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(queue = %self.config.name, worker = %worker, "Worker joined"),
                Ok(false) => warn!(queue = %self.config.name, worker = %worker, "Worker panicked"),
                Err(_) => {
                    warn!(queue = %self.config.name, worker = %worker, "Worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        debug!(queue = %self.config.name, workers = count, "Worker threads joined");
    }
}
