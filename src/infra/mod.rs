//! In-memory data structures backing a task queue.

pub mod queue;
pub mod retention;
