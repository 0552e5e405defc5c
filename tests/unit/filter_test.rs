//! Tests for snapshot filters

use taskq_engine::core::filter::{
    finished, not_finished, running, waiting, with_datastore, with_meta_status,
};
use taskq_engine::core::{MetaStatus, TaskFilter, TaskState, TaskStateBuilder};

fn state(id: u64, meta_status: MetaStatus, datastore_id: Option<i64>) -> TaskState {
    let builder = TaskStateBuilder::new("appconvert")
        .with_id(id)
        .with_record_id(1)
        .with_description("Convert app 1")
        .with_datastore_id(datastore_id)
        .with_meta_status(meta_status);
    let builder = match meta_status {
        MetaStatus::Init => builder,
        MetaStatus::Waiting => builder.with_queued(10),
        MetaStatus::Running => builder.with_queued(10).with_started(20),
        MetaStatus::Finished => builder.with_queued(10).with_started(20).with_finished(30),
    };
    builder.build().unwrap()
}

#[test]
fn test_meta_status_filters() {
    let w = state(1, MetaStatus::Waiting, None);
    let r = state(2, MetaStatus::Running, None);
    let f = state(3, MetaStatus::Finished, None);

    assert!(waiting().matches(&w) && !waiting().matches(&r));
    assert!(running().matches(&r) && !running().matches(&f));
    assert!(finished().matches(&f) && !finished().matches(&w));
    assert!(not_finished().matches(&w) && not_finished().matches(&r));
    assert!(!not_finished().matches(&f));

    let statuses = [MetaStatus::Waiting, MetaStatus::Finished];
    let either = with_meta_status(&statuses);
    assert!(either.matches(&w) && either.matches(&f) && !either.matches(&r));
}

#[test]
fn test_datastore_filter_and_closures() {
    let attached = state(1, MetaStatus::Running, Some(5));
    let detached = state(2, MetaStatus::Running, None);

    assert!(with_datastore(5).matches(&attached));
    assert!(!with_datastore(5).matches(&detached));

    let even_ids = |s: &TaskState| s.id() % 2 == 0;
    assert!(even_ids.matches(&detached));
}
