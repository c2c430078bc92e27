//! Test utilities for hierlock integration tests
//!
//! - LockFixture: a lock manager with an event recorder attached
//! - threads: named worker threads and bounded polling

#![allow(dead_code)]

pub mod lock_fixture;
pub mod threads;
