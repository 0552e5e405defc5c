//! Builders to construct task queues from configuration.

pub mod queue_builder;

pub use queue_builder::{build_queues, build_queues_with_workpools};
