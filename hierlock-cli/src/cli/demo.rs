// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deadlock demo
//!
//! Two threads lock a document and its collection in opposite orders. One
//! of the requests closes a wait cycle and is abandoned with a deadlock
//! error; the other then completes.

use colored::Colorize;
use hierlock::{DeadlockPolicy, JsonLockEventListener, LockError, LockManager, LockManagerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const COLLECTION: &str = "/db/demo";
const DOCUMENT: &str = "/db/demo/report.xml";

/// Outcome of one demo thread
struct Outcome {
    thread: &'static str,
    result: Result<(), LockError>,
}

/// Handle the demo command
pub fn handle_demo(
    events: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => LockManagerConfig::load(&path)
            .map_err(|e| format!("Failed to load {}: {}", path.display(), e))?,
        None => LockManagerConfig::default(),
    };
    let manager = Arc::new(LockManager::new(demo_config(config)));

    let listener = events.as_ref().map(|path| {
        let listener = Arc::new(JsonLockEventListener::new(path));
        manager.lock_table().register_listener(listener)
    });

    println!("{}", "Provoking a collection/document deadlock...".bold().green());
    println!("  → doc-first: WRITE {} then WRITE {}", DOCUMENT, COLLECTION);
    println!("  → col-first: WRITE {} then WRITE {}", COLLECTION, DOCUMENT);

    let (outcomes, dump) = run_demo(&manager)?;

    println!();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("  {} {}", outcome.thread.bold(), "completed".green()),
            Err(err) => println!("  {} {}: {}", outcome.thread.bold(), "abandoned".red(), err),
        }
    }

    if !dump.is_empty() {
        println!("\n{}", "Waiting threads while blocked:".bold());
        print!("{}", dump);
    }

    if let (Some(id), Some(path)) = (listener, events) {
        manager.lock_table().deregister_listener(id);
        println!("\nLock events written to {}", path.display());
    }
    Ok(())
}

/// The demo needs the cycle broken, so a reporting policy is overridden
fn demo_config(mut config: LockManagerConfig) -> LockManagerConfig {
    if config.deadlock_policy == DeadlockPolicy::Report {
        log::warn!("The demo never finishes under the report deadlock policy; using abandon");
        config.deadlock_policy = DeadlockPolicy::Abandon;
    }
    config
}

fn run_demo(manager: &Arc<LockManager>) -> Result<(Vec<Outcome>, String), Box<dyn std::error::Error>> {
    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));

    let (m, gate) = (Arc::clone(manager), Arc::clone(&barrier));
    let doc_first = thread::Builder::new()
        .name("doc-first".to_string())
        .spawn(move || -> Result<(), LockError> {
            let _doc = m.acquire_resource_write(DOCUMENT)?;
            gate.wait();
            let _col = m.acquire_collection_write(COLLECTION)?;
            thread::sleep(Duration::from_millis(20));
            Ok(())
        })?;

    let (m, gate) = (Arc::clone(manager), Arc::clone(&barrier));
    let col_first = thread::Builder::new()
        .name("col-first".to_string())
        .spawn(move || -> Result<(), LockError> {
            let _col = m.acquire_collection_write(COLLECTION)?;
            gate.wait();
            let _doc = m.acquire_resource_write(DOCUMENT)?;
            thread::sleep(Duration::from_millis(20));
            Ok(())
        })?;

    // snapshot the wait-for state the first time a thread is seen blocked
    let (m, finished) = (Arc::clone(manager), Arc::clone(&done));
    let watcher = thread::spawn(move || {
        while !finished.load(Ordering::SeqCst) {
            if m.detector().waiting_count() > 0 {
                return m.detector().debug_string();
            }
            thread::sleep(Duration::from_millis(1));
        }
        String::new()
    });

    let mut outcomes = Vec::new();
    for (thread, handle) in [("doc-first", doc_first), ("col-first", col_first)] {
        let result = handle
            .join()
            .map_err(|_| format!("demo thread {} panicked", thread))?;
        outcomes.push(Outcome { thread, result });
    }
    done.store(true, Ordering::SeqCst);
    let dump = watcher
        .join()
        .map_err(|_| "demo watcher panicked".to_string())?;

    log::debug!("Demo finished with {} waiting threads", manager.detector().waiting_count());
    Ok((outcomes, dump))
}
