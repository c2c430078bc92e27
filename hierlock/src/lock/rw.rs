// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Multi-reader, single-writer reentrant lock
//!
//! Granting rules:
//! - the WRITE owner is granted any further READ or WRITE immediately;
//!   a READ taken under WRITE is recorded, so releasing the WRITE leaves
//!   the thread holding READ (downgrade)
//! - a thread already holding READ gets another READ immediately
//! - a new READ waits while a writer holds the lock or is queued
//! - WRITE is granted once no other thread holds READ or WRITE; queued
//!   writers are served in arrival order, except that a READ holder
//!   upgrading to WRITE does not queue behind writers that wait on it
//!
//! A blocked thread is recorded in the deadlock detector for the whole
//! wait and re-walks the wait-for graph on every wake-up. The state mutex
//! is never held while the detector is consulted: the detector calls back
//! into [`Lock::blockers`] under its own mutex.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Lock, LockInfo, LockMode, LockOwner, LockType};
use crate::config::{DeadlockPolicy, LockSettings};
use crate::deadlock::DeadlockDetector;
use crate::error::LockError;
use crate::thread::ThreadRef;

/// Distinguishes resource locks from collection locks
pub trait LockKind: Send + Sync + 'static {
    const LOCK_TYPE: LockType;

    /// Record `thread` as blocked on `lock` in the detector
    fn add_waiter(
        detector: &DeadlockDetector,
        thread: &ThreadRef,
        lock: Arc<dyn Lock>,
        mode: LockMode,
    );

    fn clear_waiter(detector: &DeadlockDetector, thread: &ThreadRef);
}

#[derive(Default)]
pub(crate) struct RwState {
    /// One record per READ hold
    readers: Vec<LockOwner>,
    writer: Option<LockOwner>,
    write_count: usize,
    waiting_for_read: Vec<ThreadRef>,
    waiting_for_write: VecDeque<ThreadRef>,
}

impl RwState {
    fn is_writer(&self, thread: &ThreadRef) -> bool {
        self.writer.as_ref().map_or(false, |w| w.is(thread))
    }

    fn holds_read(&self, thread: &ThreadRef) -> bool {
        self.readers.iter().any(|r| r.is(thread))
    }

    fn has_other_readers(&self, thread: &ThreadRef) -> bool {
        self.readers.iter().any(|r| !r.is(thread))
    }

    pub(crate) fn can_grant(&self, thread: &ThreadRef, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => {
                self.is_writer(thread)
                    || self.holds_read(thread)
                    || (self.writer.is_none() && self.waiting_for_write.is_empty())
            }
            LockMode::Write => {
                if self.is_writer(thread) {
                    return true;
                }
                if self.writer.is_some() || self.has_other_readers(thread) {
                    return false;
                }
                self.holds_read(thread)
                    || self
                        .waiting_for_write
                        .front()
                        .map_or(true, |head| head == thread)
            }
        }
    }

    pub(crate) fn grant(&mut self, owner: LockOwner, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers.push(owner),
            LockMode::Write => {
                if self.is_writer(owner.thread()) {
                    self.write_count += 1;
                } else {
                    self.writer = Some(owner);
                    self.write_count = 1;
                }
            }
        }
    }

    /// Drop one hold; false when `thread` holds nothing in `mode`
    pub(crate) fn release(&mut self, thread: &ThreadRef, mode: LockMode) -> bool {
        match mode {
            LockMode::Write => {
                if !self.is_writer(thread) {
                    return false;
                }
                self.write_count -= 1;
                if self.write_count == 0 {
                    self.writer = None;
                }
                true
            }
            LockMode::Read => match self.readers.iter().rposition(|r| r.is(thread)) {
                Some(pos) => {
                    self.readers.remove(pos);
                    true
                }
                None => false,
            },
        }
    }

    pub(crate) fn enqueue(&mut self, thread: &ThreadRef, mode: LockMode) {
        match mode {
            LockMode::Read => self.waiting_for_read.push(thread.clone()),
            LockMode::Write => self.waiting_for_write.push_back(thread.clone()),
        }
    }

    pub(crate) fn dequeue(&mut self, thread: &ThreadRef, mode: LockMode) {
        match mode {
            LockMode::Read => {
                if let Some(pos) = self.waiting_for_read.iter().position(|t| t == thread) {
                    self.waiting_for_read.remove(pos);
                }
            }
            LockMode::Write => {
                if let Some(pos) = self.waiting_for_write.iter().position(|t| t == thread) {
                    self.waiting_for_write.remove(pos);
                }
            }
        }
    }

    fn queued_mode(&self, thread: &ThreadRef) -> Option<LockMode> {
        if self.waiting_for_write.contains(thread) {
            Some(LockMode::Write)
        } else if self.waiting_for_read.contains(thread) {
            Some(LockMode::Read)
        } else {
            None
        }
    }

    /// Threads a queued `thread` is waiting on; empty when it is not queued
    pub(crate) fn blockers(&self, thread: &ThreadRef) -> Vec<ThreadRef> {
        let mode = match self.queued_mode(thread) {
            Some(mode) => mode,
            None => return Vec::new(),
        };
        let mut blockers: Vec<ThreadRef> = Vec::new();
        let mut push = |t: &ThreadRef| {
            if t != thread && !blockers.contains(t) {
                blockers.push(t.clone());
            }
        };
        if let Some(writer) = &self.writer {
            push(writer.thread());
        }
        match mode {
            LockMode::Write => {
                for reader in &self.readers {
                    push(reader.thread());
                }
                if !self.holds_read(thread) {
                    for queued in self.waiting_for_write.iter().take_while(|t| *t != thread) {
                        push(queued);
                    }
                }
            }
            LockMode::Read => {
                if !self.holds_read(thread) && !self.is_writer(thread) {
                    for queued in &self.waiting_for_write {
                        push(queued);
                    }
                }
            }
        }
        blockers
    }

    fn hold_count(&self, mode: LockMode) -> usize {
        match mode {
            LockMode::Read => self.readers.len(),
            LockMode::Write => self.write_count,
        }
    }

    fn reader_threads(&self) -> Vec<ThreadRef> {
        let mut threads: Vec<ThreadRef> = Vec::new();
        for reader in &self.readers {
            if !threads.contains(reader.thread()) {
                threads.push(reader.thread().clone());
            }
        }
        threads
    }
}

fn names(threads: &[ThreadRef]) -> Vec<String> {
    threads.iter().map(|t| t.name().to_string()).collect()
}

/// Reentrant read/write lock, parameterized by the kind of entity it guards
pub struct ReentrantLock<K: LockKind> {
    id: String,
    state: Mutex<RwState>,
    cond: Condvar,
    detector: Arc<DeadlockDetector>,
    settings: LockSettings,
    _kind: PhantomData<fn() -> K>,
}

impl<K: LockKind> ReentrantLock<K> {
    pub fn new(id: impl Into<String>, detector: Arc<DeadlockDetector>, settings: LockSettings) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(RwState::default()),
            cond: Condvar::new(),
            detector,
            settings,
            _kind: PhantomData,
        }
    }

    /// Block until the calling thread holds the lock in `mode`
    pub fn acquire(self: &Arc<Self>, mode: LockMode) -> Result<(), LockError> {
        self.acquire_until(mode, None)
    }

    /// Like [`acquire`](Self::acquire), giving up with `LockError::Timeout` after `timeout`
    pub fn acquire_timeout(self: &Arc<Self>, mode: LockMode, timeout: Duration) -> Result<(), LockError> {
        self.acquire_until(mode, Some(Instant::now() + timeout))
    }

    /// Take the lock only if it can be granted without waiting
    pub fn attempt(&self, mode: LockMode) -> bool {
        let thread = ThreadRef::current();
        let mut state = self.state.lock();
        if state.can_grant(&thread, mode) {
            state.grant(LockOwner::new(thread, self.settings.capture_stacks), mode);
            true
        } else {
            false
        }
    }

    /// Drop one hold of the calling thread in `mode`
    pub fn release(&self, mode: LockMode) -> Result<(), LockError> {
        let thread = ThreadRef::current();
        let released = self.state.lock().release(&thread, mode);
        if !released {
            log::error!(
                "{} tried to release a {} lock on {} it does not hold",
                thread,
                mode,
                self.id
            );
            return Err(LockError::NotHeld {
                id: self.id.clone(),
                mode,
                thread: thread.name().to_string(),
            });
        }
        self.cond.notify_all();
        Ok(())
    }

    pub fn is_locked_for_write(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// True when `thread` holds a READ record
    pub fn is_locked_for_read(&self, thread: &ThreadRef) -> bool {
        self.state.lock().holds_read(thread)
    }

    /// True while anybody holds the lock
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer.is_some() || !state.readers.is_empty()
    }

    /// True when nobody holds the lock and nobody waits for it
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.writer.is_none()
            && state.readers.is_empty()
            && state.waiting_for_read.is_empty()
            && state.waiting_for_write.is_empty()
    }

    /// Holds in `mode` across all threads
    pub fn hold_count(&self, mode: LockMode) -> usize {
        self.state.lock().hold_count(mode)
    }

    fn acquire_until(self: &Arc<Self>, mode: LockMode, deadline: Option<Instant>) -> Result<(), LockError> {
        let thread = ThreadRef::current();
        {
            let mut state = self.state.lock();
            if state.can_grant(&thread, mode) {
                state.grant(LockOwner::new(thread, self.settings.capture_stacks), mode);
                return Ok(());
            }
            // a pending interrupt only stops a request that would block
            if thread.take_interrupt() {
                return Err(self.interrupted(&thread, mode));
            }
            if mode == LockMode::Write && state.holds_read(&thread) && self.settings.upgrade_check {
                log::warn!(
                    "{} holds READ on {} and cannot upgrade without waiting",
                    thread,
                    self.id
                );
                return Err(LockError::UpgradeWouldDeadlock { id: self.id.clone() });
            }
            if mode == LockMode::Write
                && self.settings.warn_wait_on_read_for_write
                && state.has_other_readers(&thread)
            {
                log::warn!(
                    "{} waits for READ holders [{}] of {} to release before taking WRITE",
                    thread,
                    names(&state.reader_threads()).join(", "),
                    self.id
                );
            }
            state.enqueue(&thread, mode);
        }

        let lock: Arc<dyn Lock> = self.clone();
        K::add_waiter(&self.detector, &thread, lock, mode);
        let result = self.wait_for_grant(&thread, mode, deadline);
        K::clear_waiter(&self.detector, &thread);
        result
    }

    fn wait_for_grant(
        &self,
        thread: &ThreadRef,
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> Result<(), LockError> {
        let mut reported = false;
        loop {
            let blockers = self.blockers(thread);
            let cycle = blockers
                .iter()
                .find_map(|owner| self.detector.find_cycle(thread, owner));
            if let Some(cycle) = cycle {
                let cycle = names(&cycle);
                match self.settings.deadlock_policy {
                    DeadlockPolicy::Abandon => {
                        log::warn!(
                            "Deadlock detected: {} abandons its {} request for {} {}; cycle: [{}]",
                            thread,
                            mode,
                            K::LOCK_TYPE,
                            self.id,
                            cycle.join(", ")
                        );
                        self.dequeue_and_notify(thread, mode);
                        return Err(LockError::Deadlock {
                            id: self.id.clone(),
                            mode,
                            thread: thread.name().to_string(),
                            cycle,
                        });
                    }
                    DeadlockPolicy::Report => {
                        if !reported {
                            log::warn!(
                                "Deadlock detected: {} keeps waiting for {} on {} {}; cycle: [{}]",
                                thread,
                                mode,
                                K::LOCK_TYPE,
                                self.id,
                                cycle.join(", ")
                            );
                            reported = true;
                        }
                    }
                }
            }

            let mut state = self.state.lock();
            if state.can_grant(thread, mode) {
                state.dequeue(thread, mode);
                state.grant(LockOwner::new(thread.clone(), self.settings.capture_stacks), mode);
                return Ok(());
            }
            if thread.take_interrupt() {
                state.dequeue(thread, mode);
                drop(state);
                self.cond.notify_all();
                return Err(self.interrupted(thread, mode));
            }
            let mut wait = self.settings.deadlock_check_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    state.dequeue(thread, mode);
                    drop(state);
                    self.cond.notify_all();
                    return Err(LockError::Timeout {
                        id: self.id.clone(),
                        mode,
                    });
                }
                wait = wait.min(deadline - now);
            }
            self.cond.wait_for(&mut state, wait);
        }
    }

    fn dequeue_and_notify(&self, thread: &ThreadRef, mode: LockMode) {
        self.state.lock().dequeue(thread, mode);
        self.cond.notify_all();
    }

    fn interrupted(&self, thread: &ThreadRef, mode: LockMode) -> LockError {
        LockError::Interrupted {
            id: self.id.clone(),
            mode,
            thread: thread.name().to_string(),
        }
    }
}

impl<K: LockKind> Lock for ReentrantLock<K> {
    fn id(&self) -> &str {
        &self.id
    }

    fn lock_type(&self) -> LockType {
        K::LOCK_TYPE
    }

    fn write_locked_thread(&self) -> Option<ThreadRef> {
        self.state.lock().writer.as_ref().map(|w| w.thread().clone())
    }

    fn read_lock_holders(&self) -> Vec<ThreadRef> {
        self.state.lock().reader_threads()
    }

    fn has_lock(&self, thread: &ThreadRef) -> bool {
        let state = self.state.lock();
        state.is_writer(thread) || state.holds_read(thread)
    }

    fn blockers(&self, thread: &ThreadRef) -> Vec<ThreadRef> {
        self.state.lock().blockers(thread)
    }

    fn lock_info(&self) -> LockInfo {
        let state = self.state.lock();
        let readers = names(&state.reader_threads());
        let (lock_mode, owners) = match &state.writer {
            Some(writer) => (LockMode::Write, vec![writer.thread().name().to_string()]),
            None => (LockMode::Read, readers.clone()),
        };
        LockInfo {
            lock_type: K::LOCK_TYPE,
            lock_mode,
            id: self.id.clone(),
            owners,
            read_locks: readers,
            waiting_for_read: names(&state.waiting_for_read),
            waiting_for_write: state
                .waiting_for_write
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        }
    }

    fn release(&self, mode: LockMode) -> Result<(), LockError> {
        ReentrantLock::release(self, mode)
    }

    fn wake_up(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

impl<K: LockKind> fmt::Debug for ReentrantLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("type", &K::LOCK_TYPE)
            .field("id", &self.id)
            .finish()
    }
}
