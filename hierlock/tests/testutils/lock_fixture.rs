//! Lock manager fixture for integration tests
//!
//! Each fixture owns an independent manager, detector and event table, so
//! tests running in parallel never observe each other's locks.

use hierlock::{LockAction, LockEvent, LockEventListener, LockManager, LockManagerConfig};
use parking_lot::Mutex;
use std::sync::Arc;

/// Listener keeping every event in memory
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<LockEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().clone()
    }

    /// `(action, id)` of the events reported by `thread`
    pub fn actions_of(&self, thread: &str) -> Vec<(LockAction, String)> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.thread == thread)
            .map(|e| (e.action, e.id.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LockEventListener for EventRecorder {
    fn accept(&self, event: &LockEvent) {
        self.events.lock().push(event.clone());
    }
}

pub struct LockFixture {
    manager: Arc<LockManager>,
    recorder: Arc<EventRecorder>,
}

impl LockFixture {
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    pub fn with_config(config: LockManagerConfig) -> Self {
        super::threads::init_logging();
        let manager = Arc::new(LockManager::new(config));
        let recorder = Arc::new(EventRecorder::default());
        manager.lock_table().register_listener(recorder.clone());
        Self { manager, recorder }
    }

    pub fn manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.manager)
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }
}
