//! Tests for the public task-state model

use std::collections::HashSet;
use std::sync::Arc;

use taskq_engine::core::{DomainHandle, MetaStatus, TaskIdSupplier, TaskState, TaskStateBuilder};

#[test]
fn test_id_supplier_is_unique_across_threads() {
    let ids = Arc::new(TaskIdSupplier::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ids = Arc::clone(&ids);
            std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(id > 0);
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), 1000);
}

#[test]
fn test_meta_status_order_and_names() {
    assert!(MetaStatus::Init < MetaStatus::Waiting);
    assert!(MetaStatus::Waiting < MetaStatus::Running);
    assert!(MetaStatus::Running < MetaStatus::Finished);
    assert_eq!(MetaStatus::default(), MetaStatus::Init);
    assert!(MetaStatus::Waiting.is_active() && MetaStatus::Running.is_active());
    assert!(!MetaStatus::Init.is_active() && !MetaStatus::Finished.is_active());
    assert_eq!(
        serde_json::to_string(&MetaStatus::Finished).unwrap(),
        "\"FINISHED\""
    );
}

#[test]
fn test_domain_handle_identity() {
    let a = DomainHandle::new("appconvert", 42);
    assert_eq!(a, DomainHandle::new("appconvert", 42));
    assert_ne!(a, DomainHandle::new("manualmode", 42));
    assert_ne!(a, DomainHandle::new("appconvert", 43));
    assert_eq!(a.to_string(), "appconvert-42");
}

#[test]
fn test_builder_copy_keeps_every_field() {
    let ids = TaskIdSupplier::new();
    let original = TaskStateBuilder::new("appconvert")
        .with_new_id(&ids)
        .with_record_id(42)
        .with_description("Convert app 42")
        .with_status("QUEUED")
        .with_status_link(Some("/apps/42/conversion".into()))
        .with_progress(0)
        .with_datastore_id(Some(3))
        .build()
        .unwrap();

    let copy = original.to_builder().build().unwrap();
    assert_eq!(copy, original);

    let edited = original.to_builder().with_progress(40).build().unwrap();
    assert_eq!(edited.progress(), 40);
    assert_eq!(edited.status_link(), Some("/apps/42/conversion"));
    assert_eq!(edited.handle(), original.handle());
}

#[test]
fn test_snapshot_json_round_trip() {
    let state = TaskStateBuilder::new("feedscan")
        .with_id(9)
        .with_record_id(1)
        .with_description("Scan feed 1")
        .build()
        .unwrap()
        .advance(MetaStatus::Waiting, 1_000)
        .unwrap();

    let json = serde_json::to_string(&state).unwrap();
    let back: TaskState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
}
