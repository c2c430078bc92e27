// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Path -> lock registry
//!
//! Locks are created on first use. The registry holds a strong reference to
//! every lock it hands out, so a path maps to one instance for as long as that
//! instance can carry hold state. Entries go away only through
//! [`LockRegistry::purge_unused`], and only for locks nobody else references
//! and that the caller reports as idle.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LockRegistry<L> {
    locks: RwLock<HashMap<String, Arc<L>>>,
}

impl<L> LockRegistry<L> {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// The lock for `path`, creating it if there is none
    ///
    /// Lookup and creation happen under one write lock, so concurrent callers
    /// for the same path always receive the same instance.
    pub fn get_or_create(&self, path: &str, create: impl FnOnce() -> L) -> Arc<L> {
        if let Some(lock) = self.get(path) {
            return lock;
        }
        let mut locks = self.locks.write();
        Arc::clone(
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    /// The lock for `path`, if one was created and not purged since
    pub fn get(&self, path: &str) -> Option<Arc<L>> {
        self.locks.read().get(path).cloned()
    }

    /// Drop entries that only the registry references and that `is_idle`
    /// accepts; returns how many
    ///
    /// A handle obtained from the registry keeps its entry alive. Without
    /// outside references a lock can still carry holds taken through a handle
    /// that has since been dropped, so `is_idle` must reject locked instances.
    pub fn purge_unused(&self, is_idle: impl Fn(&L) -> bool) -> usize {
        let mut locks = self.locks.write();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1 || !is_idle(lock));
        let purged = before - locks.len();
        if purged > 0 {
            log::debug!("Purged {} unused lock entries", purged);
        }
        purged
    }

    /// Entries currently in the map
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L> Default for LockRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}
