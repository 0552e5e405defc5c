//! Task model, scheduling and the task-queue facade.

pub mod capacity;
pub mod error;
pub mod events;
pub mod filter;
pub mod state;
pub mod task;
pub mod task_queue;

mod ordering;
mod registry;
mod scheduler;

pub use capacity::{
    effective_bound, CapacitySupplier, ConcurrencyLimit, FixedCapacity, WorkpoolCapacity,
    WorkpoolDirectory, WorkpoolInfo, CAPACITY_DERIVE,
};
pub use error::{AppResult, SchedulerError, StateError};
pub use events::{InMemoryEventSink, TaskEvent, TaskEventListener};
pub use filter::TaskFilter;
pub use scheduler::QueueStats;
pub use state::{DomainHandle, MetaStatus, TaskId, TaskIdSupplier, TaskState, TaskStateBuilder};
pub use task::{CancelHandle, Task, TaskBody, TaskContext};
pub use task_queue::TaskQueue;
