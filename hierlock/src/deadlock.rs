// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Wait-for graph bookkeeping and cycle detection
//!
//! Every thread blocked in a lock acquire is recorded in one of two maps:
//! threads waiting for a resource lock and threads waiting for a collection
//! lock. An edge `A -> B` of the wait-for graph exists when `A` is recorded
//! as waiting on a lock and `B` is one of that lock's blockers for `A`.
//!
//! The detector's mutex may be held while calling into a lock; locks never
//! call the detector while holding their own state mutex.

use parking_lot::Mutex;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::lock::{Lock, LockInfo, LockMode};
use crate::thread::ThreadRef;

/// A thread blocked on a resource lock
pub struct WaitingThread {
    thread: ThreadRef,
    lock: Arc<dyn Lock>,
    mode: LockMode,
    since: Instant,
}

impl WaitingThread {
    pub fn new(thread: ThreadRef, lock: Arc<dyn Lock>, mode: LockMode) -> Self {
        Self {
            thread,
            lock,
            mode,
            since: Instant::now(),
        }
    }

    pub fn thread(&self) -> &ThreadRef {
        &self.thread
    }

    pub fn lock(&self) -> &Arc<dyn Lock> {
        &self.lock
    }

    /// Mode the thread asked for
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn waited(&self) -> Duration {
        self.since.elapsed()
    }
}

impl fmt::Debug for WaitingThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingThread")
            .field("thread", &self.thread)
            .field("lock", &self.lock.id())
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Default)]
struct WaitMaps {
    resources: HashMap<ThreadRef, WaitingThread>,
    collections: HashMap<ThreadRef, Arc<dyn Lock>>,
}

impl WaitMaps {
    fn waiting_lock(&self, thread: &ThreadRef) -> Option<&Arc<dyn Lock>> {
        self.resources
            .get(thread)
            .map(|w| &w.lock)
            .or_else(|| self.collections.get(thread))
    }

    fn contains(&self, thread: &ThreadRef) -> bool {
        self.resources.contains_key(thread) || self.collections.contains_key(thread)
    }

    fn waits(&self) -> impl Iterator<Item = (&ThreadRef, &Arc<dyn Lock>)> {
        self.resources
            .iter()
            .map(|(t, w)| (t, &w.lock))
            .chain(self.collections.iter())
    }
}

/// Process-wide record of which thread waits on which lock
#[derive(Default)]
pub struct DeadlockDetector {
    maps: Mutex<WaitMaps>,
}

impl DeadlockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource_waiter(&self, thread: &ThreadRef, waiting: WaitingThread) {
        let mut maps = self.maps.lock();
        Self::check_not_waiting(&maps, thread);
        maps.resources.insert(thread.clone(), waiting);
    }

    /// Deregister a resource wait; `None` when `thread` was not registered
    pub fn clear_resource_waiter(&self, thread: &ThreadRef) -> Option<Arc<dyn Lock>> {
        self.maps.lock().resources.remove(thread).map(|w| w.lock)
    }

    pub fn add_collection_waiter(&self, thread: &ThreadRef, lock: Arc<dyn Lock>) {
        let mut maps = self.maps.lock();
        Self::check_not_waiting(&maps, thread);
        maps.collections.insert(thread.clone(), lock);
    }

    /// Deregister a collection wait; `None` when `thread` was not registered
    pub fn clear_collection_waiter(&self, thread: &ThreadRef) -> Option<Arc<dyn Lock>> {
        self.maps.lock().collections.remove(thread)
    }

    fn check_not_waiting(maps: &WaitMaps, thread: &ThreadRef) {
        let already_waiting = maps.contains(thread);
        if already_waiting {
            log::error!(
                "{} registered as waiting while already waiting for {}",
                thread,
                maps.waiting_lock(thread).map(|l| l.id()).unwrap_or("?")
            );
        }
        debug_assert!(!already_waiting, "{} is already registered as a waiter", thread);
    }

    /// The lock `thread` is blocked on, from either map
    pub fn is_waiting_for(&self, thread: &ThreadRef) -> Option<Arc<dyn Lock>> {
        self.maps.lock().waiting_lock(thread).cloned()
    }

    /// True iff `b` waits for a resource lock held by `a`
    pub fn is_blocked_by(&self, a: &ThreadRef, b: &ThreadRef) -> bool {
        let lock = match self.maps.lock().resources.get(b) {
            Some(waiting) => Arc::clone(&waiting.lock),
            None => return false,
        };
        lock.has_lock(a)
    }

    /// Would `waiter` close a cycle by waiting for a lock held by `owner`?
    ///
    /// Only cycles leading back to `waiter` count; threads already in
    /// `visited` are not walked again.
    pub fn would_deadlock(
        &self,
        waiter: &ThreadRef,
        owner: &ThreadRef,
        visited: &mut HashSet<ThreadRef>,
    ) -> bool {
        let maps = self.maps.lock();
        let mut path = Vec::new();
        Self::walk(&maps, waiter, owner, visited, &mut path)
    }

    /// The cycle `waiter -> owner -> ... -> waiter`, if there is one
    pub fn find_cycle(&self, waiter: &ThreadRef, owner: &ThreadRef) -> Option<Vec<ThreadRef>> {
        let maps = self.maps.lock();
        let mut visited = HashSet::new();
        let mut path = vec![waiter.clone()];
        if Self::walk(&maps, waiter, owner, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk(
        maps: &WaitMaps,
        waiter: &ThreadRef,
        owner: &ThreadRef,
        visited: &mut HashSet<ThreadRef>,
        path: &mut Vec<ThreadRef>,
    ) -> bool {
        if owner == waiter || !visited.insert(owner.clone()) {
            return false;
        }
        let lock = match maps.waiting_lock(owner) {
            Some(lock) => lock,
            None => return false,
        };
        path.push(owner.clone());
        for next in lock.blockers(owner) {
            if &next == waiter || Self::walk(maps, waiter, &next, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Every wait cycle currently present, each listed once
    pub fn find_deadlocks(&self) -> Vec<Vec<ThreadRef>> {
        let mut graph: DiGraphMap<u64, ()> = DiGraphMap::new();
        let mut threads: HashMap<u64, ThreadRef> = HashMap::new();
        {
            let maps = self.maps.lock();
            for (thread, lock) in maps.waits() {
                graph.add_node(thread.key());
                threads.insert(thread.key(), thread.clone());
                for blocker in lock.blockers(thread) {
                    graph.add_edge(thread.key(), blocker.key(), ());
                    threads.insert(blocker.key(), blocker);
                }
            }
        }

        let mut cycles: Vec<Vec<ThreadRef>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut cycle: Vec<ThreadRef> = component
                    .iter()
                    .filter_map(|key| threads.get(key).cloned())
                    .collect();
                cycle.sort_by_key(|t| t.key());
                cycle
            })
            .collect();
        cycles.sort_by_key(|cycle| cycle.first().map(|t| t.key()));
        if !cycles.is_empty() {
            log::warn!("{} wait cycle(s) present in the lock table", cycles.len());
        }
        cycles
    }

    pub fn waiting_count(&self) -> usize {
        let maps = self.maps.lock();
        maps.resources.len() + maps.collections.len()
    }

    /// Lock state for every waiting thread, keyed by thread name
    pub fn get_waiting_threads(&self) -> BTreeMap<String, LockInfo> {
        let maps = self.maps.lock();
        maps.waits()
            .map(|(thread, lock)| (thread.name().to_string(), lock.lock_info()))
            .collect()
    }

    /// Write one block per waiting thread
    pub fn debug(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (name, info) in self.get_waiting_threads() {
            writeln!(out, "Thread: {}", name)?;
            info.debug(out)?;
        }
        Ok(())
    }

    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.debug(&mut out);
        out
    }
}
