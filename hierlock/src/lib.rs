// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Hierlock - hierarchical lock manager for a tree-shaped document store
//!
//! Concurrent transactions get reentrant read/write access to
//! **collections** (directory-like containers) and **resources**
//! (documents). Locks may be taken in inconsistent orders across the two
//! kinds; instead of forbidding that, every blocked acquire is recorded in a
//! wait-for graph and a request that would close a cycle is detected.
//!
//! # Features
//!
//! - **Reentrant read/write locks**: shared readers, exclusive reentrant
//!   writer, READ under WRITE, upgrade of a sole reader
//! - **Deadlock detection** across resource and collection waits
//! - **Lock events**: every attempt, acquisition and release is reported to
//!   listeners, including a JSON file recorder
//! - **Hierarchical collection locking** with RAII guards
//!
//! # Usage
//!
//! ```no_run
//! use hierlock::{LockManager, LockManagerConfig};
//!
//! let manager = LockManager::new(LockManagerConfig::default());
//! let collection = manager.acquire_collection_write("/db/docs")?;
//! let document = manager.acquire_resource_write("/db/docs/a.xml")?;
//! drop(document);
//! drop(collection);
//! # Ok::<(), hierlock::LockError>(())
//! ```

pub mod config;
pub mod deadlock;
pub mod error;
pub mod lock;
pub mod manager;
pub mod path;
pub mod registry;
pub mod table;
pub mod thread;
pub mod trace;

pub use config::{DeadlockPolicy, LockManagerConfig, StackTraceDepth};
pub use deadlock::{DeadlockDetector, WaitingThread};
pub use error::{ConfigError, LockError};
pub use lock::{CollectionLock, Lock, LockInfo, LockMode, LockType, ResourceLock};
pub use manager::{LockManager, ManagedLock};
pub use table::{
    JsonLockEventListener, ListenerId, LockAction, LockEvent, LockEventListener, LockEventTable,
    LogLockEventListener,
};
pub use thread::ThreadRef;

/// Hierlock version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hierlock crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
