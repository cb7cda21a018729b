use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::ControlEvent;

/// Drawing history since the last clear, replayed to every new session.
///
/// Held in memory only; a restarted server starts with an empty canvas.
#[derive(Default)]
pub struct ReplayLog {
    events: Mutex<Vec<ControlEvent>>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: ControlEvent) {
        self.lock().push(event);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Records an incoming control event: strokes are appended, a clear
    /// truncates the log.
    pub fn apply(&self, event: &ControlEvent) {
        let mut events = self.lock();
        record(&mut events, event);
    }

    /// Applies `event` and runs `then` before the log is unlocked.
    ///
    /// The hub uses this to take a registry snapshot that is consistent with
    /// the log: any session that joins afterwards already sees `event` in its
    /// replay, and any session in the snapshot did not.
    pub fn apply_and<T>(&self, event: &ControlEvent, then: impl FnOnce() -> T) -> T {
        let mut events = self.lock();
        record(&mut events, event);
        then()
    }

    pub fn snapshot(&self) -> Vec<ControlEvent> {
        self.lock().clone()
    }

    /// Hands a copy of the log to `then` while still holding the lock.
    pub fn snapshot_and<T>(&self, then: impl FnOnce(Vec<ControlEvent>) -> T) -> T {
        let events = self.lock();
        then(events.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ControlEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record(events: &mut Vec<ControlEvent>, event: &ControlEvent) {
    match event {
        ControlEvent::Draw { .. } => events.push(event.clone()),
        ControlEvent::Clear => events.clear(),
    }
}
