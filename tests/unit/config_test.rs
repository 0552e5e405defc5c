//! Tests for configuration validation

use std::time::Duration;

use taskq_engine::config::{SchedulerConfig, TaskQueueConfig, MAX_WORKERS};

#[test]
fn test_queue_config_defaults() {
    let cfg = TaskQueueConfig::new("conversions");
    assert_eq!(cfg.name, "conversions");
    assert!(cfg.max_concurrent >= 1);
    assert_eq!(cfg.max_finished, 1000);
    assert_eq!(cfg.max_workers, MAX_WORKERS);
    assert_eq!(cfg.capacity_refresh(), Duration::from_secs(30));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_queue_config_negative_concurrency_derives() {
    let cfg = TaskQueueConfig::new("conversions").with_max_concurrent(-1);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_queue_config_invalid_values() {
    let base = TaskQueueConfig::new("conversions");
    assert!(base.clone().with_max_concurrent(0).validate().is_err());
    assert!(base.clone().with_max_workers(0).validate().is_err());
    assert!(base
        .clone()
        .with_max_workers(MAX_WORKERS + 1)
        .validate()
        .is_err());
    assert!(base.clone().with_max_queue_depth(0).validate().is_err());
    assert!(base.clone().with_thread_stack_size(1024).validate().is_err());
    assert!(TaskQueueConfig::new("").validate().is_err());
}

#[test]
fn test_queue_config_from_json_applies_defaults() {
    let cfg = TaskQueueConfig::from_json_str(r#"{ "name": "feeds", "max_concurrent": 4 }"#)
        .unwrap();
    assert_eq!(cfg.max_concurrent, 4);
    assert_eq!(cfg.max_finished, 1000);
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(10));

    let err = TaskQueueConfig::from_json_str(r#"{ "name": "feeds", "max_workers": 0 }"#)
        .unwrap_err();
    assert!(err.contains("max_workers"));
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "queues": {
            "conversions": { "max_concurrent": -1, "max_finished": 200 },
            "feeds": { "max_concurrent": 2, "capacity_refresh_secs": 0 }
        }
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.queues.len(), 2);
    assert_eq!(config.queues["conversions"].max_finished, 200);
    assert_eq!(config.queues["feeds"].capacity_refresh_secs, 0);
}

#[test]
fn test_scheduler_config_rejects_bad_queue() {
    let json = r#"{ "queues": { "feeds": { "max_queue_depth": 0 } } }"#;
    let err = SchedulerConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("queue `feeds` invalid"));
}

#[test]
fn test_scheduler_config_empty_queues() {
    let config = SchedulerConfig {
        queues: std::collections::HashMap::new(),
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_queue_config_from_env() {
    std::env::set_var("TASKQ_MAX_FINISHED", "25");
    std::env::set_var("TASKQ_CAPACITY_REFRESH_SECS", " 5 ");
    let cfg = TaskQueueConfig::from_env("conversions").unwrap();
    assert_eq!(cfg.max_finished, 25);
    assert_eq!(cfg.capacity_refresh(), Duration::from_secs(5));

    std::env::set_var("TASKQ_MAX_WORKERS", "many");
    let err = TaskQueueConfig::from_env("conversions").unwrap_err();
    assert!(err.starts_with("TASKQ_MAX_WORKERS"));

    for key in [
        "TASKQ_MAX_FINISHED",
        "TASKQ_CAPACITY_REFRESH_SECS",
        "TASKQ_MAX_WORKERS",
    ] {
        std::env::remove_var(key);
    }
}
