// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock event table
//!
//! Multicast point for lock state transitions. The lock manager reports
//! every attempt, acquisition, failed attempt and release; the table keeps
//! per-thread bookkeeping of pending attempts and acquired holds and hands
//! each event to the registered listeners synchronously. Listeners are
//! called while the table's bookkeeping mutex is held, so they observe
//! events in the same order the table recorded them and must not report
//! lock events themselves.

mod json;
mod log_listener;

pub use json::JsonLockEventListener;
pub use log_listener::LogLockEventListener;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::LockManagerConfig;
use crate::lock::{LockMode, LockType};
use crate::thread::ThreadRef;
use crate::trace::{self, StackFrame, StackTraceDepth};

/// Log target of the table and of [`LogLockEventListener`]
pub const LOG_TARGET: &str = "hierlock::table";

/// Kind of lock state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockAction {
    Attempt,
    Acquired,
    Released,
    AttemptFailed,
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockAction::Attempt => "ATTEMPT",
            LockAction::Acquired => "ACQUIRED",
            LockAction::Released => "RELEASED",
            LockAction::AttemptFailed => "ATTEMPT_FAILED",
        };
        f.write_str(name)
    }
}

/// The lock an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDescriptor {
    #[serde(rename = "type")]
    pub lock_type: LockType,
    pub mode: LockMode,
    pub hold_count: usize,
}

/// One lock state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub action: LockAction,
    pub group_id: u64,
    pub id: String,
    pub thread: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<StackFrame>,
    pub lock: LockDescriptor,
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}#{}({}) of {}",
            self.action, self.lock.lock_type, self.group_id, self.lock.mode, self.id
        )?;
        if let Some(frame) = self.trace.first() {
            write!(f, " for #{}", frame)?;
        }
        write!(f, " by {} at {}", self.thread, self.timestamp)?;
        if matches!(self.action, LockAction::Acquired | LockAction::Released) {
            write!(f, ". count={}", self.lock.hold_count)?;
        }
        Ok(())
    }
}

/// Observer of lock events
///
/// `accept` runs on the thread that caused the transition while the table's
/// bookkeeping mutex is held. Calls are therefore never concurrent and arrive
/// in recording order, but every lock transition in the process waits for
/// them: a listener doing I/O should buffer it or hand events to a thread of
/// its own. [`JsonLockEventListener`] writes through a buffer.
pub trait LockEventListener: Send + Sync {
    /// Called once before the listener receives its first event
    fn registered(&self) {}

    fn accept(&self, event: &LockEvent);

    /// Called once after the listener received its last event
    fn unregistered(&self) {}
}

/// Handle returned by [`LockEventTable::register_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Holds (or pending attempts) of one thread on one lock in one mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHold {
    pub id: String,
    pub lock_type: LockType,
    pub mode: LockMode,
    pub thread: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    thread: u64,
    id: String,
    lock_type: LockType,
    mode: LockMode,
}

struct Entry {
    thread: String,
    count: usize,
}

#[derive(Default)]
struct Entries {
    attempting: HashMap<EntryKey, Entry>,
    acquired: HashMap<EntryKey, Entry>,
    /// id -> (read, write) balance, maintained in sanity-check mode
    lock_counts: HashMap<String, (i64, i64)>,
}

impl Entries {
    fn increment(map: &mut HashMap<EntryKey, Entry>, key: EntryKey, thread: &ThreadRef) -> usize {
        let entry = map.entry(key).or_insert_with(|| Entry {
            thread: thread.name().to_string(),
            count: 0,
        });
        entry.count += 1;
        entry.count
    }

    /// Decrement; `None` when there was nothing to decrement
    fn decrement(map: &mut HashMap<EntryKey, Entry>, key: &EntryKey) -> Option<usize> {
        let entry = map.get_mut(key)?;
        entry.count -= 1;
        let count = entry.count;
        if count == 0 {
            map.remove(key);
        }
        Some(count)
    }

    fn snapshot(map: &HashMap<EntryKey, Entry>) -> Vec<LockHold> {
        let mut holds: Vec<LockHold> = map
            .iter()
            .map(|(key, entry)| LockHold {
                id: key.id.clone(),
                lock_type: key.lock_type,
                mode: key.mode,
                thread: entry.thread.clone(),
                count: entry.count,
            })
            .collect();
        holds.sort_by(|a, b| {
            (&a.id, a.lock_type, a.mode, &a.thread).cmp(&(&b.id, b.lock_type, b.mode, &b.thread))
        });
        holds
    }

    fn sanity_check(&mut self, action: LockAction, id: &str, mode: LockMode) {
        let (read, write) = self.lock_counts.entry(id.to_string()).or_insert((0, 0));
        let count = match mode {
            LockMode::Read => read,
            LockMode::Write => write,
        };
        match action {
            LockAction::Acquired => *count += 1,
            LockAction::Released => {
                if *count == 0 {
                    log::error!(target: LOG_TARGET, "Negative {} locks on {}", mode, id);
                }
                *count -= 1;
            }
            LockAction::Attempt | LockAction::AttemptFailed => {}
        }
    }
}

/// Lock event multicast and bookkeeping
pub struct LockEventTable {
    disable_events: AtomicBool,
    sanity_check: AtomicBool,
    trace_stack_depth: RwLock<StackTraceDepth>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn LockEventListener>)>>,
    next_listener_id: AtomicU64,
    entries: Mutex<Entries>,
}

impl LockEventTable {
    pub fn new(config: &LockManagerConfig) -> Self {
        let table = Self {
            disable_events: AtomicBool::new(config.disable_events),
            sanity_check: AtomicBool::new(config.sanity_check),
            trace_stack_depth: RwLock::new(config.trace_stack_depth),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            entries: Mutex::new(Entries::default()),
        };
        if log::log_enabled!(target: LOG_TARGET, log::Level::Trace) {
            table.register_listener(Arc::new(LogLockEventListener::default()));
        }
        table
    }

    pub fn set_trace_stack_depth(&self, depth: StackTraceDepth) {
        *self.trace_stack_depth.write() = depth;
    }

    pub fn trace_stack_depth(&self) -> StackTraceDepth {
        *self.trace_stack_depth.read()
    }

    pub fn set_disable_events(&self, disable: bool) {
        self.disable_events.store(disable, Ordering::Relaxed);
    }

    pub fn attempt(&self, group_id: u64, id: &str, lock_type: LockType, mode: LockMode) {
        self.event(LockAction::Attempt, group_id, id, lock_type, mode);
    }

    pub fn attempt_failed(&self, group_id: u64, id: &str, lock_type: LockType, mode: LockMode) {
        self.event(LockAction::AttemptFailed, group_id, id, lock_type, mode);
    }

    pub fn acquired(&self, group_id: u64, id: &str, lock_type: LockType, mode: LockMode) {
        self.event(LockAction::Acquired, group_id, id, lock_type, mode);
    }

    pub fn released(&self, group_id: u64, id: &str, lock_type: LockType, mode: LockMode) {
        self.event(LockAction::Released, group_id, id, lock_type, mode);
    }

    fn event(&self, action: LockAction, group_id: u64, id: &str, lock_type: LockType, mode: LockMode) {
        if self.disable_events.load(Ordering::Relaxed) {
            return;
        }

        let thread = ThreadRef::current();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let trace = trace::capture(self.trace_stack_depth()).unwrap_or_default();
        let key = EntryKey {
            thread: thread.key(),
            id: id.to_string(),
            lock_type,
            mode,
        };

        let mut entries = self.entries.lock();
        if self.sanity_check.load(Ordering::Relaxed) {
            entries.sanity_check(action, id, mode);
        }

        let hold_count = match action {
            LockAction::Attempt => Entries::increment(&mut entries.attempting, key, &thread),
            LockAction::AttemptFailed => {
                let pending = entries.attempting.get(&key).map(|e| e.count);
                match pending {
                    Some(pending) => {
                        Entries::decrement(&mut entries.attempting, &key);
                        pending
                    }
                    None => {
                        log::error!(target: LOG_TARGET, "No attempt found to fail for {} {} ({})", lock_type, id, mode);
                        return;
                    }
                }
            }
            LockAction::Acquired => {
                if Entries::decrement(&mut entries.attempting, &key).is_none() {
                    log::error!(target: LOG_TARGET, "No attempt found for acquired {} {} ({})", lock_type, id, mode);
                    return;
                }
                Entries::increment(&mut entries.acquired, key, &thread)
            }
            LockAction::Released => match Entries::decrement(&mut entries.acquired, &key) {
                Some(count) => count,
                None => {
                    log::error!(target: LOG_TARGET, "No hold found to release for {} {} ({})", lock_type, id, mode);
                    return;
                }
            },
        };

        let event = LockEvent {
            timestamp,
            action,
            group_id,
            id: id.to_string(),
            thread: thread.name().to_string(),
            trace,
            lock: LockDescriptor {
                lock_type,
                mode,
                hold_count,
            },
        };
        for (_, listener) in self.listeners.read().iter() {
            listener.accept(&event);
        }
    }

    /// Register a listener; it sees every event reported after this returns
    pub fn register_listener(&self, listener: Arc<dyn LockEventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        listener.registered();
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener; false when `id` is not registered
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.listeners.write();
            listeners
                .iter()
                .position(|(listener_id, _)| *listener_id == id)
                .map(|pos| listeners.remove(pos).1)
        };
        match removed {
            Some(listener) => {
                listener.unregistered();
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Unregister every listener
    pub fn shutdown(&self) {
        let listeners: Vec<_> = self.listeners.write().drain(..).collect();
        for (_, listener) in listeners {
            listener.unregistered();
        }
    }

    /// Pending attempts per thread
    pub fn attempting(&self) -> Vec<LockHold> {
        Entries::snapshot(&self.entries.lock().attempting)
    }

    /// Acquired holds per thread
    pub fn acquired_holds(&self) -> Vec<LockHold> {
        Entries::snapshot(&self.entries.lock().acquired)
    }

    /// (read, write) balance of `id`; only tracked in sanity-check mode
    pub fn lock_counts(&self, id: &str) -> Option<(i64, i64)> {
        self.entries.lock().lock_counts.get(id).copied()
    }
}

impl Default for LockEventTable {
    fn default() -> Self {
        Self::new(&LockManagerConfig::default())
    }
}

impl Drop for LockEventTable {
    fn drop(&mut self) {
        self.shutdown();
    }
}
