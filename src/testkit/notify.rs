//! Recording notifier double.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::notify::{Event, Notifier};

/// Pushes every event into a shared vec the test holds.
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingNotifier {
    /// A fresh shared event log to hand to `new`.
    #[must_use]
    pub fn shared() -> Arc<Mutex<Vec<Event>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[must_use]
    pub fn new(events: Arc<Mutex<Vec<Event>>>) -> Self {
        Self { events }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Event) {
        self.events.lock().push(event);
    }
}
