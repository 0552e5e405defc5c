//! Builders to construct task queues from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{SchedulerConfig, TaskQueueConfig};
use crate::core::{CapacitySupplier, SchedulerError, TaskQueue, WorkpoolDirectory};

/// Build one task queue per configured entry, asking `capacity_factory` for
/// each queue's capacity supplier.
///
/// # Errors
///
/// `InvalidConfig` if the configuration does not validate, or the first
/// factory or construction error.
pub fn build_queues<F>(
    cfg: &SchedulerConfig,
    mut capacity_factory: F,
) -> Result<HashMap<String, TaskQueue>, SchedulerError>
where
    F: FnMut(&str, &TaskQueueConfig) -> Result<Arc<dyn CapacitySupplier>, SchedulerError>,
{
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut queues = HashMap::with_capacity(cfg.queues.len());
    for (name, queue_cfg) in &cfg.queues {
        let capacity = capacity_factory(name, queue_cfg)?;
        let mut queue_cfg = queue_cfg.clone();
        queue_cfg.name.clone_from(name);
        queues.insert(name.clone(), TaskQueue::new(queue_cfg, capacity)?);
    }
    Ok(queues)
}

/// Build queues whose capacity comes from `max_concurrent`, or is derived
/// from `directory` when that value is negative.
///
/// # Errors
///
/// Same as [`build_queues`].
pub fn build_queues_with_workpools(
    cfg: &SchedulerConfig,
    directory: Arc<dyn WorkpoolDirectory>,
) -> Result<HashMap<String, TaskQueue>, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut queues = HashMap::with_capacity(cfg.queues.len());
    for (name, queue_cfg) in &cfg.queues {
        let mut queue_cfg = queue_cfg.clone();
        queue_cfg.name.clone_from(name);
        queues.insert(name.clone(), TaskQueue::from_config(queue_cfg, Arc::clone(&directory))?);
    }
    Ok(queues)
}
