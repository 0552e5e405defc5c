//! Worker thread loop and body execution.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, warn};

use crate::core::task::TaskContext;

use super::{Job, SchedulerCore};

enum Outcome {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
    Panicked,
}

/// Body of one worker thread: pull jobs until told to retire.
pub(super) fn run(core: &Arc<SchedulerCore>, worker_id: usize) {
    debug!(queue = %core.name(), worker_id, "Worker thread started");

    // Each worker drives its bodies on its own single-threaded runtime.
    let rt = match Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(queue = %core.name(), worker_id, error = %e, "Failed to create worker runtime");
            core.worker_exited();
            return;
        }
    };

    while let Some(job) = core.next_job(worker_id) {
        execute(core, &rt, worker_id, job);
    }

    debug!(queue = %core.name(), worker_id, "Worker thread exiting");
}

fn execute(core: &SchedulerCore, rt: &Runtime, worker_id: usize, job: Job) {
    let Job { task, cancel } = job;
    let ctx = TaskContext::new(Arc::clone(&task), cancel.clone(), core.events.clone());
    let body = Arc::clone(&task.body);
    let started = Instant::now();
    debug!(queue = %core.name(), worker_id, task_id = task.id, "Worker executing task");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        rt.block_on(async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Outcome::Cancelled,
                result = body.run(ctx) => match result {
                    Ok(()) => Outcome::Completed,
                    Err(e) => Outcome::Failed(e),
                },
            }
        })
    }))
    .unwrap_or(Outcome::Panicked);

    let elapsed_ms = started.elapsed().as_millis();
    let counters = core.counters();
    match outcome {
        Outcome::Completed => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %core.name(), worker_id, task_id = task.id, elapsed_ms, "Task completed");
        }
        Outcome::Failed(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(queue = %core.name(), worker_id, task_id = task.id, elapsed_ms, error = %e, "Task failed");
        }
        Outcome::Cancelled => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %core.name(), worker_id, task_id = task.id, elapsed_ms, "Task cancelled");
        }
        Outcome::Panicked => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(queue = %core.name(), worker_id, task_id = task.id, elapsed_ms, "Task panicked");
        }
    }

    core.finish(&task);
}
