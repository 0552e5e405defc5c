//! Presentation order for `TaskQueue::get_all_tasks`.
//!
//! FINISHED first (oldest finish first), then RUNNING (earliest start first),
//! then WAITING in live queue order. A WAITING snapshot that is no longer in
//! the queue counts as RUNNING with the latest possible start time.

use std::cmp::Ordering;

use crate::core::state::{MetaStatus, TaskState};
use crate::util::clock::Timestamp;

/// A snapshot plus its position in the pending queue, if it is queued.
pub(crate) type Positioned = (TaskState, Option<usize>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Group {
    Finished,
    Running,
    Waiting,
}

fn group(entry: &Positioned) -> Group {
    match (entry.0.meta_status(), entry.1) {
        (MetaStatus::Finished, _) => Group::Finished,
        (MetaStatus::Waiting | MetaStatus::Init, Some(_)) => Group::Waiting,
        _ => Group::Running,
    }
}

fn by_time_then_id(a: Option<Timestamp>, b: Option<Timestamp>, a_id: u64, b_id: u64) -> Ordering {
    let a = a.unwrap_or(Timestamp::MAX);
    let b = b.unwrap_or(Timestamp::MAX);
    a.cmp(&b).then(a_id.cmp(&b_id))
}

fn compare(a: &Positioned, b: &Positioned) -> Ordering {
    let (ga, gb) = (group(a), group(b));
    ga.cmp(&gb).then_with(|| {
        let (sa, sb) = (&a.0, &b.0);
        match ga {
            Group::Finished => by_time_then_id(sa.finished(), sb.finished(), sa.id(), sb.id()),
            Group::Running => by_time_then_id(sa.started(), sb.started(), sa.id(), sb.id()),
            Group::Waiting => a.1.cmp(&b.1).then(sa.id().cmp(&sb.id())),
        }
    })
}

/// Sort `entries` into presentation order and drop the positions.
pub(crate) fn presentation_order(mut entries: Vec<Positioned>) -> Vec<TaskState> {
    entries.sort_by(compare);
    entries.into_iter().map(|(state, _)| state).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::TaskStateBuilder;

    fn waiting(id: u64, queued: Timestamp) -> TaskState {
        TaskStateBuilder::new("test")
            .with_id(id)
            .with_record_id(1)
            .with_description("ordering test")
            .build()
            .unwrap()
            .advance(MetaStatus::Waiting, queued)
            .unwrap()
    }

    fn running(id: u64, started: Timestamp) -> TaskState {
        waiting(id, 0).advance(MetaStatus::Running, started).unwrap()
    }

    fn finished(id: u64, at: Timestamp) -> TaskState {
        running(id, 0).advance(MetaStatus::Finished, at).unwrap()
    }

    fn ids(states: &[TaskState]) -> Vec<u64> {
        states.iter().map(TaskState::id).collect()
    }

    #[test]
    fn test_groups_and_inner_order() {
        let entries = vec![
            (waiting(1, 5), Some(1)),
            (running(2, 30), None),
            (finished(3, 20), None),
            (waiting(4, 6), Some(0)),
            (finished(5, 10), None),
            (running(6, 25), None),
        ];
        assert_eq!(ids(&presentation_order(entries)), vec![5, 3, 6, 2, 4, 1]);
    }

    #[test]
    fn test_ties_break_on_id() {
        let entries = vec![
            (finished(9, 10), None),
            (finished(4, 10), None),
            (running(8, 3), None),
            (running(7, 3), None),
        ];
        assert_eq!(ids(&presentation_order(entries)), vec![4, 9, 7, 8]);
    }

    #[test]
    fn test_dequeued_waiting_counts_as_latest_running() {
        let entries = vec![
            (waiting(3, 1), Some(0)),
            (waiting(1, 1), None),
            (running(2, 50), None),
        ];
        assert_eq!(ids(&presentation_order(entries)), vec![2, 1, 3]);
    }
}
