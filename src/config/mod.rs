//! Configuration models for task queues.

pub mod queue;

pub use queue::{SchedulerConfig, TaskQueueConfig, MAX_WORKERS};
