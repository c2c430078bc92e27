// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collection locks
//!
//! Same granting rules as resource locks; a blocked thread is recorded in
//! the detector's collection map so wait chains can tell a thread blocked on
//! a directory from one blocked on a document.

use std::sync::Arc;

use super::rw::{LockKind, ReentrantLock};
use super::{Lock, LockMode, LockType};
use crate::deadlock::DeadlockDetector;
use crate::thread::ThreadRef;

pub struct Collection;

impl LockKind for Collection {
    const LOCK_TYPE: LockType = LockType::Collection;

    fn add_waiter(
        detector: &DeadlockDetector,
        thread: &ThreadRef,
        lock: Arc<dyn Lock>,
        _mode: LockMode,
    ) {
        detector.add_collection_waiter(thread, lock);
    }

    fn clear_waiter(detector: &DeadlockDetector, thread: &ThreadRef) {
        detector.clear_collection_waiter(thread);
    }
}

/// Reentrant read/write lock on one collection
pub type CollectionLock = ReentrantLock<Collection>;
