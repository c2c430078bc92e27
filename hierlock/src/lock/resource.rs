// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Document locks

use std::sync::Arc;

use super::rw::{LockKind, ReentrantLock};
use super::{Lock, LockMode, LockType};
use crate::deadlock::{DeadlockDetector, WaitingThread};
use crate::thread::ThreadRef;

/// Marker for locks guarding a single resource
pub struct Resource;

impl LockKind for Resource {
    const LOCK_TYPE: LockType = LockType::Resource;

    fn add_waiter(
        detector: &DeadlockDetector,
        thread: &ThreadRef,
        lock: Arc<dyn Lock>,
        mode: LockMode,
    ) {
        detector.add_resource_waiter(thread, WaitingThread::new(thread.clone(), lock, mode));
    }

    fn clear_waiter(detector: &DeadlockDetector, thread: &ThreadRef) {
        detector.clear_resource_waiter(thread);
    }
}

/// Reentrant read/write lock on one document
pub type ResourceLock = ReentrantLock<Resource>;
