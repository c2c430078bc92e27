// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock manager
//!
//! Entry point for the storage and transaction layers. Hands out resource
//! and collection locks by path, locks collection hierarchies top-down,
//! reports every transition to the lock event table and returns RAII guards
//! that release in reverse acquisition order.
//!
//! Collection hierarchy (`/db/a/b`):
//!
//! | request | `/db` | `/db/a` | `/db/a/b` |
//! |---|---|---|---|
//! | read | READ | READ | READ |
//! | write | WRITE | WRITE | WRITE |
//! | write, multi-writer | READ | READ | WRITE |
//! | write with parent, multi-writer | READ | WRITE | WRITE |

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{LockManagerConfig, LockSettings};
use crate::deadlock::DeadlockDetector;
use crate::error::LockError;
use crate::lock::{CollectionLock, Lock, LockInfo, LockKind, LockMode, LockType, ReentrantLock, ResourceLock};
use crate::path;
use crate::registry::LockRegistry;
use crate::table::LockEventTable;
use crate::thread::ThreadRef;

struct HeldLock {
    lock: Arc<dyn Lock>,
    mode: LockMode,
}

/// Locks taken by one manager call, released in reverse order on drop
///
/// A guard must be released by the thread that acquired it, so it is
/// neither `Send` nor `Sync`.
#[must_use = "dropping the guard releases its locks"]
pub struct ManagedLock {
    path: String,
    group_id: u64,
    held: Vec<HeldLock>,
    table: Arc<LockEventTable>,
    _not_send: PhantomData<*const ()>,
}

impl ManagedLock {
    fn new(path: String, group_id: u64, table: Arc<LockEventTable>) -> Self {
        Self {
            path,
            group_id,
            held: Vec::new(),
            table,
            _not_send: PhantomData,
        }
    }

    /// Path the guard was requested for
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Group id shared by the events of this acquisition
    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    /// `(type, id, mode)` of each held lock, in acquisition order
    pub fn locks(&self) -> Vec<(LockType, String, LockMode)> {
        self.held
            .iter()
            .map(|h| (h.lock.lock_type(), h.lock.id().to_string(), h.mode))
            .collect()
    }

    /// Release every lock now, reporting the first release error
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<(), LockError> {
        let mut first_error = None;
        while let Some(held) = self.held.pop() {
            match held.lock.release(held.mode) {
                Ok(()) => self.table.released(
                    self.group_id,
                    held.lock.id(),
                    held.lock.lock_type(),
                    held.mode,
                ),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ManagedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedLock")
            .field("path", &self.path)
            .field("group_id", &self.group_id)
            .field("locks", &self.locks())
            .finish()
    }
}

impl Drop for ManagedLock {
    fn drop(&mut self) {
        // release errors are already logged by the lock
        let _ = self.release_all();
    }
}

/// Hierarchical lock manager
pub struct LockManager {
    config: LockManagerConfig,
    settings: LockSettings,
    detector: Arc<DeadlockDetector>,
    table: Arc<LockEventTable>,
    collection_locks: LockRegistry<CollectionLock>,
    resource_locks: LockRegistry<ResourceLock>,
    next_group_id: AtomicU64,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        let table = Arc::new(LockEventTable::new(&config));
        Self {
            settings: config.lock_settings(),
            config,
            detector: Arc::new(DeadlockDetector::new()),
            table,
            collection_locks: LockRegistry::new(),
            resource_locks: LockRegistry::new(),
            next_group_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    pub fn detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }

    pub fn lock_table(&self) -> &Arc<LockEventTable> {
        &self.table
    }

    /// The lock object for a collection, created on first use
    ///
    /// Every call for a path returns the same instance until
    /// [`LockManager::purge_unused`] drops it, so holds taken through a
    /// handle survive the handle.
    pub fn collection_lock(&self, path: &str) -> Result<Arc<CollectionLock>, LockError> {
        Ok(self.collection_lock_normalized(&path::normalize(path)?))
    }

    /// The lock object for a resource, created on first use
    pub fn resource_lock(&self, path: &str) -> Result<Arc<ResourceLock>, LockError> {
        Ok(self.resource_lock_normalized(&path::normalize(path)?))
    }

    fn collection_lock_normalized(&self, path: &str) -> Arc<CollectionLock> {
        self.collection_locks.get_or_create(path, || {
            CollectionLock::new(path, Arc::clone(&self.detector), self.settings)
        })
    }

    fn resource_lock_normalized(&self, path: &str) -> Arc<ResourceLock> {
        self.resource_locks.get_or_create(path, || {
            ResourceLock::new(path, Arc::clone(&self.detector), self.settings)
        })
    }

    fn next_group(&self, path: String) -> ManagedLock {
        let group_id = self.next_group_id.fetch_add(1, Ordering::Relaxed);
        ManagedLock::new(path, group_id, Arc::clone(&self.table))
    }

    /// Acquire `lock` into `guard`, reporting the attempt and its outcome
    fn acquire_into<K: LockKind>(
        &self,
        guard: &mut ManagedLock,
        lock: Arc<ReentrantLock<K>>,
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> Result<(), LockError> {
        self.table.attempt(guard.group_id, lock.id(), K::LOCK_TYPE, mode);
        let result = match deadline {
            Some(deadline) => {
                lock.acquire_timeout(mode, deadline.saturating_duration_since(Instant::now()))
            }
            None => lock.acquire(mode),
        };
        match result {
            Ok(()) => {
                self.table.acquired(guard.group_id, lock.id(), K::LOCK_TYPE, mode);
                guard.held.push(HeldLock { lock, mode });
                Ok(())
            }
            Err(err) => {
                self.table.attempt_failed(guard.group_id, lock.id(), K::LOCK_TYPE, mode);
                log::debug!(
                    "Unable to acquire {} {} for {}: {}",
                    K::LOCK_TYPE,
                    mode,
                    lock.id(),
                    err
                );
                Err(err)
            }
        }
    }

    pub fn acquire_resource_read(&self, path: &str) -> Result<ManagedLock, LockError> {
        self.acquire_resource(path, LockMode::Read, None)
    }

    pub fn acquire_resource_write(&self, path: &str) -> Result<ManagedLock, LockError> {
        self.acquire_resource(path, LockMode::Write, None)
    }

    pub fn acquire_resource_lock(&self, path: &str, mode: LockMode) -> Result<ManagedLock, LockError> {
        self.acquire_resource(path, mode, None)
    }

    pub fn acquire_resource_lock_timeout(
        &self,
        path: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<ManagedLock, LockError> {
        self.acquire_resource(path, mode, Some(Instant::now() + timeout))
    }

    fn acquire_resource(
        &self,
        path: &str,
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> Result<ManagedLock, LockError> {
        let path = path::normalize(path)?;
        let lock = self.resource_lock_normalized(&path);
        let mut guard = self.next_group(path);
        self.acquire_into(&mut guard, lock, mode, deadline)?;
        Ok(guard)
    }

    /// READ-lock every collection from the root segment down to `path`
    pub fn acquire_collection_read(&self, path: &str) -> Result<ManagedLock, LockError> {
        self.acquire_collection(path, |_, _| LockMode::Read)
    }

    /// WRITE-lock the collection at `path`; see the module table for ancestors
    pub fn acquire_collection_write(&self, path: &str) -> Result<ManagedLock, LockError> {
        self.acquire_collection_write_with_parent(path, false)
    }

    /// Like [`acquire_collection_write`](Self::acquire_collection_write), also
    /// WRITE-locking the parent collection when `lock_parent` is set
    pub fn acquire_collection_write_with_parent(
        &self,
        path: &str,
        lock_parent: bool,
    ) -> Result<ManagedLock, LockError> {
        let multi_writer = self.config.collections_multi_writer;
        self.acquire_collection(path, |index, len| {
            let is_leaf = index + 1 == len;
            let is_parent = index + 2 == len;
            if is_leaf || (lock_parent && is_parent) || !multi_writer {
                LockMode::Write
            } else {
                LockMode::Read
            }
        })
    }

    fn acquire_collection(
        &self,
        path: &str,
        mode_for: impl Fn(usize, usize) -> LockMode,
    ) -> Result<ManagedLock, LockError> {
        let path = path::normalize(path)?;
        let segments = path::collection_segments(&path);
        let mut guard = self.next_group(path);
        for (index, segment) in segments.iter().enumerate() {
            let mode = mode_for(index, segments.len());
            let lock = self.collection_lock_normalized(segment);
            // on failure the partial guard is dropped, releasing in reverse
            self.acquire_into(&mut guard, lock, mode, None)?;
        }
        Ok(guard)
    }

    pub fn is_collection_locked_for_write(&self, path: &str) -> bool {
        self.existing_collection_lock(path)
            .map_or(false, |lock| lock.is_locked_for_write())
    }

    /// True while any thread holds READ on the collection
    pub fn is_collection_locked_for_read(&self, path: &str) -> bool {
        self.existing_collection_lock(path)
            .map_or(false, |lock| lock.hold_count(LockMode::Read) > 0)
    }

    pub fn is_resource_locked_for_write(&self, path: &str) -> bool {
        self.existing_resource_lock(path)
            .map_or(false, |lock| lock.is_locked_for_write())
    }

    /// True while any thread holds READ on the resource
    pub fn is_resource_locked_for_read(&self, path: &str) -> bool {
        self.existing_resource_lock(path)
            .map_or(false, |lock| lock.hold_count(LockMode::Read) > 0)
    }

    fn existing_collection_lock(&self, path: &str) -> Option<Arc<CollectionLock>> {
        path::normalize(path)
            .ok()
            .and_then(|path| self.collection_locks.get(&path))
    }

    fn existing_resource_lock(&self, path: &str) -> Option<Arc<ResourceLock>> {
        path::normalize(path)
            .ok()
            .and_then(|path| self.resource_locks.get(&path))
    }

    /// Would `requesting` close a wait cycle by waiting on `blocking`?
    pub fn try_detect_deadlock(&self, requesting: &ThreadRef, blocking: &ThreadRef) -> bool {
        self.detector
            .would_deadlock(requesting, blocking, &mut HashSet::new())
    }

    pub fn snapshot_waiting_threads(&self) -> BTreeMap<String, LockInfo> {
        self.detector.get_waiting_threads()
    }

    pub fn find_deadlocks(&self) -> Vec<Vec<ThreadRef>> {
        self.detector.find_deadlocks()
    }

    pub fn debug_waiting_threads(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.detector.debug(out)
    }

    /// Interrupt `thread`, waking the lock it is blocked on
    ///
    /// Returns true when the thread was blocked; otherwise the interrupt stays
    /// pending and its next acquire that would have to wait fails with
    /// `LockError::Interrupted`. Acquires granted at once leave it pending.
    pub fn interrupt(&self, thread: &ThreadRef) -> bool {
        thread.interrupt();
        match self.detector.is_waiting_for(thread) {
            Some(lock) => {
                lock.wake_up();
                true
            }
            None => false,
        }
    }

    /// Drop registry entries of idle locks nobody else references
    pub fn purge_unused(&self) -> usize {
        self.collection_locks.purge_unused(|lock| lock.is_idle())
            + self.resource_locks.purge_unused(|lock| lock.is_idle())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockManagerConfig::default())
    }
}
