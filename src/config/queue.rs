//! Task-queue and scheduler configuration structures.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infra::retention::DEFAULT_RETENTION;

/// Hard ceiling on worker threads per queue.
pub const MAX_WORKERS: usize = 100;

const DEFAULT_MAX_QUEUE_DEPTH: usize = 10_000;
const DEFAULT_TASKS_PER_RECORD: usize = 3;
const DEFAULT_CAPACITY_REFRESH_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

fn default_max_concurrent() -> i64 {
    i64::try_from(num_cpus::get()).unwrap_or(1)
}

#[allow(clippy::cast_possible_wrap)]
const fn default_max_finished() -> i64 {
    DEFAULT_RETENTION as i64
}

const fn default_max_workers() -> usize {
    MAX_WORKERS
}

const fn default_max_queue_depth() -> usize {
    DEFAULT_MAX_QUEUE_DEPTH
}

const fn default_tasks_per_record() -> usize {
    DEFAULT_TASKS_PER_RECORD
}

const fn default_capacity_refresh_secs() -> u64 {
    DEFAULT_CAPACITY_REFRESH_SECS
}

const fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

const fn default_stack_size() -> usize {
    DEFAULT_STACK_SIZE
}

/// Configuration of one task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Queue name, attached to every log record. Taken from the map key
    /// when loaded through [`SchedulerConfig`].
    #[serde(default)]
    pub name: String,
    /// Allowed concurrency. Negative derives it from the external worker pools.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: i64,
    /// Finished tasks kept for queries. Values below 1 keep the default of 1000.
    #[serde(default = "default_max_finished")]
    pub max_finished: i64,
    /// Ceiling on worker threads whatever the capacity supplier says.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum WAITING tasks before submissions are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Sizing hint for the per-record index.
    #[serde(default = "default_tasks_per_record")]
    pub expected_tasks_per_record: usize,
    /// Seconds between capacity re-evaluations. 0 re-evaluates only on notification.
    #[serde(default = "default_capacity_refresh_secs")]
    pub capacity_refresh_secs: u64,
    /// Seconds to wait for tasks on shutdown before force-cancelling them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Stack size for worker threads.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
}

impl TaskQueueConfig {
    /// Defaults for a queue called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrent: default_max_concurrent(),
            max_finished: default_max_finished(),
            max_workers: MAX_WORKERS,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            expected_tasks_per_record: DEFAULT_TASKS_PER_RECORD,
            capacity_refresh_secs: DEFAULT_CAPACITY_REFRESH_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Set the allowed concurrency (negative derives it).
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: i64) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the retention capacity.
    #[must_use]
    pub const fn with_max_finished(mut self, max_finished: i64) -> Self {
        self.max_finished = max_finished;
        self
    }

    /// Set the worker ceiling.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the waiting-task limit.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the per-record sizing hint.
    #[must_use]
    pub const fn with_expected_tasks_per_record(mut self, n: usize) -> Self {
        self.expected_tasks_per_record = n;
        self
    }

    /// Set the capacity refresh interval in seconds.
    #[must_use]
    pub const fn with_capacity_refresh_secs(mut self, secs: u64) -> Self {
        self.capacity_refresh_secs = secs;
        self
    }

    /// Set the shutdown grace window in seconds.
    #[must_use]
    pub const fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Capacity refresh interval.
    #[must_use]
    pub const fn capacity_refresh(&self) -> Duration {
        Duration::from_secs(self.capacity_refresh_secs)
    }

    /// Shutdown grace window.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be positive, or negative to derive it".into());
        }
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(format!("max_workers must be within 1..={MAX_WORKERS}"));
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse a queue configuration from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `TASKQ_*` environment variables, after loading
    /// a `.env` file if one exists.
    ///
    /// Reads `TASKQ_MAX_CONCURRENT`, `TASKQ_MAX_FINISHED`, `TASKQ_MAX_WORKERS`,
    /// `TASKQ_MAX_QUEUE_DEPTH`, `TASKQ_CAPACITY_REFRESH_SECS` and
    /// `TASKQ_SHUTDOWN_GRACE_SECS`.
    ///
    /// # Errors
    ///
    /// A variable that does not parse, or a result that fails validation.
    pub fn from_env(name: impl Into<String>) -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::new(name);
        if let Some(v) = env_var("TASKQ_MAX_CONCURRENT")? {
            cfg.max_concurrent = v;
        }
        if let Some(v) = env_var("TASKQ_MAX_FINISHED")? {
            cfg.max_finished = v;
        }
        if let Some(v) = env_var("TASKQ_MAX_WORKERS")? {
            cfg.max_workers = v;
        }
        if let Some(v) = env_var("TASKQ_MAX_QUEUE_DEPTH")? {
            cfg.max_queue_depth = v;
        }
        if let Some(v) = env_var("TASKQ_CAPACITY_REFRESH_SECS")? {
            cfg.capacity_refresh_secs = v;
        }
        if let Some(v) = env_var("TASKQ_SHUTDOWN_GRACE_SECS")? {
            cfg.shutdown_grace_secs = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_var<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}

/// Root configuration: one entry per task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of queue name to configuration.
    pub queues: HashMap<String, TaskQueueConfig>,
}

impl SchedulerConfig {
    /// Validate all queues and ensure at least one exists.
    ///
    /// # Errors
    ///
    /// A message naming the first invalid queue.
    pub fn validate(&self) -> Result<(), String> {
        if self.queues.is_empty() {
            return Err("at least one queue must be defined".into());
        }
        for (name, queue) in &self.queues {
            let mut queue = queue.clone();
            queue.name.clone_from(name);
            queue
                .validate()
                .map_err(|e| format!("queue `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
