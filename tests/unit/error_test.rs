//! Tests for error types

use taskq_engine::core::{MetaStatus, SchedulerError, StateError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("conversions".to_string());
    assert_eq!(format!("{err}"), "queue full: conversions");
}

#[test]
fn test_not_init_error() {
    let err = SchedulerError::NotInit {
        id: 7,
        status: MetaStatus::Running,
    };
    assert_eq!(
        format!("{err}"),
        "task 7 is RUNNING, only INIT tasks can be queued"
    );
}

#[test]
fn test_invalid_transition_error() {
    let err = SchedulerError::InvalidTransition {
        id: 3,
        from: MetaStatus::Finished,
        to: MetaStatus::Running,
    };
    assert_eq!(format!("{err}"), "task 3 cannot move from FINISHED to RUNNING");
}

#[test]
fn test_state_error_converts() {
    let err: SchedulerError = StateError::InvalidRecordId(0).into();
    assert!(matches!(
        err,
        SchedulerError::InvalidState(StateError::InvalidRecordId(0))
    ));
    assert_eq!(
        format!("{err}"),
        "invalid task state: record id must be > 0, got 0"
    );
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("thread spawn failed".to_string());
    assert_eq!(format!("{err}"), "backend error: thread spawn failed");
}

#[test]
fn test_errors_flow_into_anyhow() {
    fn fails() -> anyhow::Result<()> {
        Err(SchedulerError::Shutdown("feeds".into()))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}
