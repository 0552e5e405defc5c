//! Tests for builder modules

use std::sync::Arc;

use taskq_engine::builders::{build_queues, build_queues_with_workpools};
use taskq_engine::config::SchedulerConfig;
use taskq_engine::core::{
    CapacitySupplier, FixedCapacity, SchedulerError, WorkpoolDirectory, WorkpoolInfo,
};

struct NoPools;

impl WorkpoolDirectory for NoPools {
    fn workpools(&self) -> Result<Vec<WorkpoolInfo>, SchedulerError> {
        Ok(Vec::new())
    }
}

fn two_queues() -> SchedulerConfig {
    SchedulerConfig::from_json_str(
        r#"{
            "queues": {
                "conversions": { "max_concurrent": -1, "shutdown_grace_secs": 1 },
                "feeds": { "max_concurrent": 2, "shutdown_grace_secs": 1 }
            }
        }"#,
    )
    .unwrap()
}

#[test]
fn test_build_queues_names_from_keys() {
    let mut asked = Vec::new();
    let queues = build_queues(&two_queues(), |name, _| {
        asked.push(name.to_string());
        Ok(Arc::new(FixedCapacity(1)) as Arc<dyn CapacitySupplier>)
    })
    .unwrap();

    asked.sort();
    assert_eq!(asked, vec!["conversions", "feeds"]);
    assert_eq!(queues["feeds"].name(), "feeds");
    assert_eq!(queues["conversions"].name(), "conversions");
    for queue in queues.values() {
        assert!(queue.graceful_shutdown(false).is_empty());
    }
}

#[test]
fn test_build_queues_stops_on_factory_error() {
    let result = build_queues(&two_queues(), |_, _| {
        Err(SchedulerError::CapacityUnavailable("directory offline".into()))
    });
    assert!(matches!(result, Err(SchedulerError::CapacityUnavailable(_))));
}

#[test]
fn test_build_queues_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        queues: std::collections::HashMap::new(),
    };
    assert!(matches!(
        build_queues_with_workpools(&cfg, Arc::new(NoPools)),
        Err(SchedulerError::InvalidConfig(_))
    ));
}

#[test]
fn test_build_queues_with_workpools() {
    let queues = build_queues_with_workpools(&two_queues(), Arc::new(NoPools)).unwrap();
    assert_eq!(queues.len(), 2);
    for queue in queues.values() {
        assert!(queue.stats().max_concurrency >= 1);
        queue.graceful_shutdown(false);
    }
}
