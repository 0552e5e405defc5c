//! Retention of finished work.

pub mod memory;

pub use memory::{FinishedRetentionBuffer, DEFAULT_RETENTION};
