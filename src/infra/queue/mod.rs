//! Pending-work queues.

pub mod memory;

pub use memory::OrderableWorkQueue;
