//! # TaskQ Engine
//!
//! A concurrent, reorderable task queue for long-running background work such
//! as application conversions and feed scans.
//!
//! Tasks are submitted in the INIT state, wait in an orderable FIFO, run on a
//! bounded pool of dedicated worker threads, and are kept for a while after
//! they finish so clients can still see what happened. The concurrency bound
//! is either configured or derived from the remaining capacity of external
//! worker pools, and is refreshed off the request path.
//!
//! ## Key Features
//!
//! - **Orderable queue**: move waiting tasks to the head, the tail, or after another task
//! - **Dynamic capacity**: resize live from a [`CapacitySupplier`](core::CapacitySupplier), never below 1
//! - **Cooperative cancellation**: abort flags plus a per-task cancel handle raced against the body
//! - **Bounded retention**: finished tasks are evicted oldest first, running their cleanup hooks
//! - **Domain lookup**: find active tasks by `(type, recordId)` or by datastore
//! - **Lifecycle events**: `Added`, `Updated`, `Removed` and move events carrying full snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use taskq_engine::config::TaskQueueConfig;
//! use taskq_engine::core::{
//!     AppResult, FixedCapacity, Task, TaskBody, TaskContext, TaskIdSupplier, TaskQueue,
//!     TaskStateBuilder,
//! };
//!
//! struct Scan;
//!
//! #[async_trait]
//! impl TaskBody for Scan {
//!     async fn run(&self, ctx: TaskContext) -> AppResult<()> {
//!         ctx.update_status_with_progress("SCANNING", 0)?;
//!         // ...
//!         ctx.update_progress(100)?;
//!         Ok(())
//!     }
//! }
//!
//! let ids = TaskIdSupplier::new();
//! let queue = TaskQueue::new(TaskQueueConfig::new("feeds"), Arc::new(FixedCapacity(2)))?;
//! let state = TaskStateBuilder::new("feedscan")
//!     .with_new_id(&ids)
//!     .with_record_id(7)
//!     .with_description("Scan feed 7")
//!     .build()?;
//! queue.add_task(Task::new(state, Scan))?;
//! let unfinished = queue.graceful_shutdown(false);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task model, scheduling and the task-queue facade.
pub mod core;
/// Configuration models for task queues.
pub mod config;
/// Builders to construct task queues from configuration.
pub mod builders;
/// In-memory data structures: orderable queue and retention buffer.
pub mod infra;
/// Shared utilities.
pub mod util;
