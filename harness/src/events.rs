//! Typed publish/subscribe bus for runner progress.
//!
//! The bus is the only genuinely concurrent seam in the system: a run
//! executes on one thread while any number of consumers (CLI reporter,
//! live progress stream) drain events from another. The listener list is
//! snapshotted under the lock and invoked outside it, so a subscriber
//! registering or unregistering from within a callback cannot deadlock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use crate::core::model::Phase;
use crate::core::results::{CategoryStatus, RunStatus, UnitStatus};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    RunStarted {
        categories: Vec<String>,
        total_categories: usize,
        total_tests: usize,
    },
    RunCompleted {
        status: RunStatus,
        passed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    CategoryStarted {
        category: String,
        planned_units: usize,
        has_setup: bool,
        has_teardown: bool,
    },
    CategoryCompleted {
        category: String,
        status: CategoryStatus,
        passed: usize,
        failed: usize,
        skipped: usize,
    },
    SessionStarting {
        category: String,
    },
    SessionStarted {
        category: String,
    },
    SessionClosing {
        category: String,
    },
    TestStarted {
        test: String,
        test_type: Phase,
        index: usize,
        total: usize,
        category: String,
    },
    TestProgress {
        test: String,
        message: String,
    },
    TestCompleted {
        test: String,
        test_type: Phase,
        status: UnitStatus,
        duration_ms: u64,
    },
    TestFailed {
        test: String,
        error: String,
        error_kind: Option<String>,
    },
    HealRequestCreated {
        test: String,
        path: PathBuf,
    },
    ContextUpdated {
        key: String,
    },
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Listener = Arc<dyn Fn(&RunnerEvent) + Send + Sync>;

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: Vec<(SubscriberId, Listener)>,
}

/// Thread-safe event bus.
///
/// A panicking listener is caught and logged; it never aborts the run.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener to every event.
    pub fn subscribe<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&RunnerEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().expect("event bus lock");
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut state = self.state.lock().expect("event bus lock");
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Subscribe through a bounded channel with best-effort delivery.
    ///
    /// When the consumer falls behind and the queue fills up, new events
    /// are dropped rather than blocking the run.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriberId, Receiver<RunnerEvent>) {
        let (tx, rx): (SyncSender<RunnerEvent>, Receiver<RunnerEvent>) = sync_channel(capacity);
        let id = self.subscribe(move |event| {
            // Full or disconnected queues are the consumer's problem.
            let _ = tx.try_send(event.clone());
        });
        (id, rx)
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: RunnerEvent) {
        let listeners: Vec<Listener> = {
            let state = self.state.lock().expect("event bus lock");
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        // Invoke outside the lock to prevent deadlocks.
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(?event, "event listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().expect("event bus lock").listeners.len()
    }

    /// Drop all listeners.
    pub fn clear(&self) {
        self.state.lock().expect("event bus lock").listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn progress(message: &str) -> RunnerEvent {
        RunnerEvent::TestProgress {
            test: "unit".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            bus.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(progress("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = bus.subscribe(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(id);

        bus.emit(progress("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("listener bug"));
        let hits_clone = Arc::clone(&hits);
        bus.subscribe(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(progress("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_can_unsubscribe_from_within_callback() {
        let bus = Arc::new(EventBus::new());
        let id_slot = Arc::new(Mutex::new(None::<SubscriberId>));

        let bus_clone = Arc::clone(&bus);
        let slot_clone = Arc::clone(&id_slot);
        let id = bus.subscribe(move |_| {
            if let Some(id) = *slot_clone.lock().expect("slot lock") {
                bus_clone.unsubscribe(id);
            }
        });
        *id_slot.lock().expect("slot lock") = Some(id);

        // Must not deadlock.
        bus.emit(progress("first"));
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn bounded_channel_drops_events_when_full() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe_channel(2);

        for i in 0..5 {
            bus.emit(progress(&i.to_string()));
        }

        let received: Vec<RunnerEvent> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], progress("0"));
        assert_eq!(received[1], progress("1"));
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let json = serde_json::to_value(progress("working")).expect("serialize");
        assert_eq!(json["event"], "test_progress");
        assert_eq!(json["message"], "working");
    }
}
