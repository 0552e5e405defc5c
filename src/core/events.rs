//! Lifecycle events and listener fan-out.
//!
//! Every event carries the latest snapshot of the task. Events are enqueued
//! on an outbox while the lock guarding the change is still held, so outbox
//! order equals mutation order. Listeners run later, outside every scheduler
//! lock, when some thread drains the outbox; a listener may call back into
//! the queue.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::state::{TaskId, TaskState};
use crate::core::task::TaskBody;

/// Lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task entered the queue.
    Added {
        /// Snapshot after queueing.
        task: TaskState,
    },
    /// Snapshot changed: picked up, finished, aborted, or a progress report.
    Updated {
        /// New snapshot.
        task: TaskState,
    },
    /// Task was evicted or flushed and is no longer tracked.
    Removed {
        /// Final snapshot.
        task: TaskState,
    },
    /// Task moved to the head of the waiting line.
    MovedToHead {
        /// Moved task.
        task: TaskState,
    },
    /// Task moved to the tail of the waiting line.
    MovedToTail {
        /// Moved task.
        task: TaskState,
    },
    /// Task moved directly after `anchor_id`.
    MovedAfter {
        /// Moved task.
        task: TaskState,
        /// Task it now follows.
        anchor_id: TaskId,
    },
}

impl TaskEvent {
    /// Snapshot carried by the event.
    #[must_use]
    pub const fn task(&self) -> &TaskState {
        match self {
            Self::Added { task }
            | Self::Updated { task }
            | Self::Removed { task }
            | Self::MovedToHead { task }
            | Self::MovedToTail { task }
            | Self::MovedAfter { task, .. } => task,
        }
    }

    /// Event name as serialized.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Updated { .. } => "updated",
            Self::Removed { .. } => "removed",
            Self::MovedToHead { .. } => "moved_to_head",
            Self::MovedToTail { .. } => "moved_to_tail",
            Self::MovedAfter { .. } => "moved_after",
        }
    }
}

/// Receives lifecycle events. Fire-and-forget: panics are caught and logged,
/// nothing is retried.
pub trait TaskEventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &TaskEvent);
}

impl<F> TaskEventListener for F
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    fn on_event(&self, event: &TaskEvent) {
        self(event);
    }
}

/// Bounded in-memory listener for tests and diagnostics. Oldest events are
/// dropped once full.
#[derive(Debug)]
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<TaskEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Sink keeping at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events: max_events.max(1),
        }
    }

    /// Copy of the stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events for one task.
    #[must_use]
    pub fn events_for(&self, id: TaskId) -> Vec<TaskEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task().id() == id)
            .cloned()
            .collect()
    }

    /// Forget everything stored.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TaskEventListener for InMemoryEventSink {
    fn on_event(&self, event: &TaskEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Work waiting in the outbox.
enum Outgoing {
    Event(TaskEvent),
    /// Run the cleanup hook of an already unregistered task, then publish `Removed`.
    Evicted {
        body: Arc<dyn TaskBody>,
        task: TaskState,
    },
}

struct BusInner {
    queue: String,
    listeners: RwLock<Vec<Arc<dyn TaskEventListener>>>,
    outbox_tx: Sender<Outgoing>,
    outbox_rx: Receiver<Outgoing>,
    /// Held while draining; one dispatcher at a time keeps delivery FIFO.
    turn: Mutex<()>,
    dispatcher: Mutex<Option<ThreadId>>,
}

/// Ordered outbox plus listener registry, shared by the scheduler and task
/// contexts.
#[derive(Clone)]
pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(queue: &str) -> Self {
        let (outbox_tx, outbox_rx) = unbounded();
        Self {
            inner: Arc::new(BusInner {
                queue: queue.to_owned(),
                listeners: RwLock::new(Vec::new()),
                outbox_tx,
                outbox_rx,
                turn: Mutex::new(()),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn TaskEventListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Sequence `event`. Call with the lock that guarded the change held.
    pub fn enqueue(&self, event: TaskEvent) {
        // Both channel ends live in `inner`, so the send cannot fail.
        let _ = self.inner.outbox_tx.send(Outgoing::Event(event));
    }

    /// Sequence the cleanup hook and `Removed` event of an unregistered task.
    pub fn enqueue_eviction(&self, body: Arc<dyn TaskBody>, task: TaskState) {
        let _ = self.inner.outbox_tx.send(Outgoing::Evicted { body, task });
    }

    /// Deliver everything in the outbox, oldest first. Must not be called
    /// with a scheduler lock held.
    ///
    /// Blocks while another thread is dispatching, so the caller's own events
    /// have been delivered when this returns. A listener that triggers new
    /// events from inside a dispatch returns immediately; the running drain
    /// picks them up.
    pub fn dispatch(&self) {
        let me = thread::current().id();
        if *self.inner.dispatcher.lock() == Some(me) {
            return;
        }
        let _turn = self.inner.turn.lock();
        *self.inner.dispatcher.lock() = Some(me);
        while let Ok(outgoing) = self.inner.outbox_rx.try_recv() {
            match outgoing {
                Outgoing::Event(event) => self.deliver(&event),
                Outgoing::Evicted { body, task } => {
                    self.run_cleanup(body.as_ref(), &task);
                    debug!(queue = %self.inner.queue, task_id = task.id(), "Task removed");
                    self.deliver(&TaskEvent::Removed { task });
                }
            }
        }
        *self.inner.dispatcher.lock() = None;
    }

    fn run_cleanup(&self, body: &dyn TaskBody, task: &TaskState) {
        match catch_unwind(AssertUnwindSafe(|| body.cleanup(task))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(queue = %self.inner.queue, task_id = task.id(), error = %e, "Task cleanup failed");
            }
            Err(_) => error!(queue = %self.inner.queue, task_id = task.id(), "Task cleanup panicked"),
        }
    }

    fn deliver(&self, event: &TaskEvent) {
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!(
                    queue = %self.inner.queue,
                    task_id = event.task().id(),
                    event = event.kind(),
                    "Event listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::TaskStateBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state(id: TaskId) -> TaskState {
        TaskStateBuilder::new("test")
            .with_id(id)
            .with_record_id(1)
            .with_description("event test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_sink_is_bounded() {
        let sink = InMemoryEventSink::new(2);
        for id in 1..=3 {
            sink.on_event(&TaskEvent::Added { task: state(id) });
        }
        let ids: Vec<_> = sink.events().iter().map(|e| e.task().id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_fanout() {
        let bus = EventBus::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(|_: &TaskEvent| panic!("listener failure")));
        let counter = Arc::clone(&hits);
        bus.subscribe(Arc::new(move |_: &TaskEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        bus.enqueue(TaskEvent::Removed { task: state(1) });
        bus.dispatch();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_is_fifo_across_threads() {
        let bus = EventBus::new("test");
        let sink = Arc::new(InMemoryEventSink::new(1000));
        bus.subscribe(Arc::clone(&sink) as Arc<dyn TaskEventListener>);

        let producers: Vec<_> = (0..4_u64)
            .map(|p| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        bus.enqueue(TaskEvent::Updated {
                            task: state(p * 100 + n + 1),
                        });
                        bus.dispatch();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let events = sink.events();
        assert_eq!(events.len(), 200);
        for p in 0..4_u64 {
            let ids: Vec<_> = events
                .iter()
                .map(|e| e.task().id())
                .filter(|id| (id - 1) / 100 == p)
                .collect();
            let expected: Vec<_> = (0..50).map(|n| p * 100 + n + 1).collect();
            assert_eq!(ids, expected, "producer {p} delivered out of order");
        }
    }

    #[test]
    fn test_nested_events_follow_the_current_one() {
        let bus = EventBus::new("test");
        let sink = Arc::new(InMemoryEventSink::new(10));
        let inner = bus.clone();
        bus.subscribe(Arc::new(move |event: &TaskEvent| {
            if let TaskEvent::Added { task } = event {
                inner.enqueue(TaskEvent::Updated { task: task.clone() });
                // Re-entrant call from a listener; must not deadlock.
                inner.dispatch();
            }
        }));
        bus.subscribe(Arc::clone(&sink) as Arc<dyn TaskEventListener>);

        bus.enqueue(TaskEvent::Added { task: state(1) });
        bus.enqueue(TaskEvent::Removed { task: state(1) });
        bus.dispatch();

        let kinds: Vec<_> = sink.events().iter().map(TaskEvent::kind).collect();
        assert_eq!(kinds, vec!["added", "removed", "updated"]);
    }

    #[test]
    fn test_eviction_runs_cleanup_before_removed() {
        use crate::core::error::AppResult;
        use crate::core::task::TaskContext;
        use async_trait::async_trait;

        struct Recorder(Arc<Mutex<Vec<&'static str>>>);

        #[async_trait]
        impl TaskBody for Recorder {
            async fn run(&self, _ctx: TaskContext) -> AppResult<()> {
                Ok(())
            }

            fn cleanup(&self, _state: &TaskState) -> AppResult<()> {
                self.0.lock().push("cleanup");
                anyhow::bail!("cleanup failure is only logged")
            }
        }

        let bus = EventBus::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        bus.subscribe(Arc::new(move |event: &TaskEvent| {
            seen.lock().push(event.kind());
        }));

        bus.enqueue_eviction(Arc::new(Recorder(Arc::clone(&order))), state(1));
        bus.enqueue(TaskEvent::Updated { task: state(2) });
        bus.dispatch();

        assert_eq!(*order.lock(), vec!["cleanup", "removed", "updated"]);
    }

    #[test]
    fn test_event_json_shape() {
        let event = TaskEvent::MovedAfter {
            task: state(4),
            anchor_id: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "moved_after");
        assert_eq!(json["anchor_id"], 2);
        assert_eq!(json["task"]["id"], 4);
        let back: TaskEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
