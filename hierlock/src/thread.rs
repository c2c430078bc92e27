// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Thread identity used as the node type of the wait-for graph

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadRef = ThreadRef::for_current_thread();
}

/// Handle naming a thread that holds or waits for locks
///
/// Two handles are equal when they refer to the same thread. The handle also
/// carries the thread's interrupt flag, which a blocked `acquire` polls on
/// every wake-up.
#[derive(Clone)]
pub struct ThreadRef {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    key: u64,
    name: String,
    interrupted: AtomicBool,
}

impl ThreadRef {
    /// Handle of the calling thread; stable for the thread's lifetime
    pub fn current() -> ThreadRef {
        CURRENT.with(|thread| thread.clone())
    }

    /// Detached handle that is not bound to any OS thread
    pub fn named(name: impl Into<String>) -> ThreadRef {
        Self::with_key(NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed), name.into())
    }

    fn for_current_thread() -> ThreadRef {
        let key = NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed);
        let name = std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread-{}", key));
        Self::with_key(key, name)
    }

    fn with_key(key: u64, name: String) -> ThreadRef {
        ThreadRef {
            inner: Arc::new(ThreadInner {
                key,
                name,
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    /// Process-wide unique key
    pub fn key(&self) -> u64 {
        self.inner.key
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Request that the thread abandon its current (or next) blocking acquire
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Clear the interrupt flag, returning whether it was set
    pub(crate) fn take_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }
}

impl PartialEq for ThreadRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for ThreadRef {}

impl Hash for ThreadRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadRef({}#{})", self.inner.name, self.inner.key)
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}
