// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reentrant read/write locks for collections and resources
//!
//! Both lock kinds share one state machine ([`ReentrantLock`]); they differ
//! only in which wait map of the [`DeadlockDetector`](crate::deadlock::DeadlockDetector)
//! a blocked thread is recorded in.

mod collection;
mod info;
mod owner;
mod resource;
mod rw;

pub use collection::{Collection, CollectionLock};
pub use info::LockInfo;
pub use owner::LockOwner;
pub use resource::{Resource, ResourceLock};
pub use rw::{LockKind, ReentrantLock};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LockError;
use crate::thread::ThreadRef;

/// Access mode of a lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => f.write_str("READ"),
            LockMode::Write => f.write_str("WRITE"),
        }
    }
}

/// Kind of entity a lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Collection,
    Resource,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::Collection => f.write_str("COLLECTION"),
            LockType::Resource => f.write_str("RESOURCE"),
        }
    }
}

/// View of a lock used by the deadlock detector and by diagnostics
pub trait Lock: Send + Sync + fmt::Debug {
    /// Path of the protected entity
    fn id(&self) -> &str;

    fn lock_type(&self) -> LockType;

    /// Current WRITE owner, if any
    fn write_locked_thread(&self) -> Option<ThreadRef>;

    /// Threads holding a READ record, one entry per thread
    fn read_lock_holders(&self) -> Vec<ThreadRef>;

    /// True when `thread` holds this lock in any mode
    fn has_lock(&self, thread: &ThreadRef) -> bool;

    /// Threads that must release or be granted before queued `thread` can proceed
    fn blockers(&self, thread: &ThreadRef) -> Vec<ThreadRef>;

    fn lock_info(&self) -> LockInfo;

    /// Drop one hold of the calling thread in `mode`
    fn release(&self, mode: LockMode) -> Result<(), LockError>;

    /// Wake every thread blocked on this lock so it re-examines its state
    fn wake_up(&self);

    fn debug(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.lock_info().debug(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_and_type_wire_names() {
        assert_eq!(serde_json::to_string(&LockMode::Write).unwrap(), "\"WRITE\"");
        assert_eq!(serde_json::to_string(&LockType::Collection).unwrap(), "\"COLLECTION\"");
        let mode: LockMode = serde_json::from_str("\"READ\"").unwrap();
        assert_eq!(mode, LockMode::Read);
        assert_eq!(LockType::Resource.to_string(), "RESOURCE");
    }
}
