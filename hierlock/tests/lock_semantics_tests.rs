//! Read/write lock semantics through the lock manager
//!
//! Mutual exclusion under randomized contention, reentrancy, downgrade,
//! upgrade checks, timeouts and interruption.

#[path = "testutils/mod.rs"]
mod testutils;

use hierlock::{LockError, LockManagerConfig, LockMode};
use serial_test::serial;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;
use testutils::lock_fixture::LockFixture;
use testutils::threads::{spawn_named, wait_until};

#[test]
#[serial]
fn test_mutual_exclusion_under_random_contention() {
    let fixture = LockFixture::new();
    let readers = Arc::new(AtomicUsize::new(0));
    let writers = Arc::new(AtomicUsize::new(0));
    let violated = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = fixture.manager();
            let (readers, writers, violated) =
                (Arc::clone(&readers), Arc::clone(&writers), Arc::clone(&violated));
            spawn_named(&format!("worker-{}", i), move || {
                let mut rng = fastrand::Rng::with_seed(i as u64);
                for _ in 0..200 {
                    if rng.u8(0..4) == 0 {
                        let _guard = manager.acquire_resource_write("/db/hot.xml").unwrap();
                        let _nested = if rng.bool() {
                            Some(manager.acquire_resource_write("/db/hot.xml").unwrap())
                        } else {
                            None
                        };
                        if writers.fetch_add(1, Ordering::SeqCst) != 0
                            || readers.load(Ordering::SeqCst) != 0
                        {
                            violated.store(true, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                        writers.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let _guard = manager.acquire_resource_read("/db/hot.xml").unwrap();
                        readers.fetch_add(1, Ordering::SeqCst);
                        if writers.load(Ordering::SeqCst) != 0 {
                            violated.store(true, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
            .0
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!violated.load(Ordering::SeqCst));
    let lock = fixture.manager().resource_lock("/db/hot.xml").unwrap();
    assert_eq!(lock.hold_count(LockMode::Read), 0);
    assert_eq!(lock.hold_count(LockMode::Write), 0);
}

#[test]
#[serial]
fn test_reentrant_write_needs_matching_releases() {
    let fixture = LockFixture::new();
    let manager = fixture.manager();
    let outer = manager.acquire_resource_write("/db/r.xml").unwrap();
    let inner = manager.acquire_resource_write("/db/r.xml").unwrap();
    let read = manager.acquire_resource_read("/db/r.xml").unwrap();
    assert_eq!(
        manager.resource_lock("/db/r.xml").unwrap().hold_count(LockMode::Write),
        2
    );

    drop(outer);
    drop(read);
    let other = fixture.manager();
    let (handle, _) = spawn_named("late-reader", move || {
        other
            .acquire_resource_lock_timeout("/db/r.xml", LockMode::Read, Duration::from_millis(50))
            .map(drop)
    });
    assert!(matches!(handle.join().unwrap(), Err(LockError::Timeout { .. })));

    drop(inner);
    let other = fixture.manager();
    let (handle, _) = spawn_named("late-reader", move || {
        other
            .acquire_resource_lock_timeout("/db/r.xml", LockMode::Read, Duration::from_secs(5))
            .map(drop)
    });
    handle.join().unwrap().unwrap();
}

#[test]
#[serial]
fn test_release_of_write_downgrades_to_read() {
    let fixture = LockFixture::new();
    let manager = fixture.manager();
    let write = manager.acquire_resource_write("/db/d.xml").unwrap();
    let read = manager.acquire_resource_read("/db/d.xml").unwrap();
    write.release().unwrap();
    assert!(!manager.is_resource_locked_for_write("/db/d.xml"));
    assert!(manager.is_resource_locked_for_read("/db/d.xml"));

    let other = fixture.manager();
    let (handle, _) = spawn_named("after-downgrade", move || {
        let read = other.acquire_resource_lock_timeout("/db/d.xml", LockMode::Read, Duration::from_secs(5));
        let write = other.acquire_resource_lock_timeout("/db/d.xml", LockMode::Write, Duration::from_millis(50));
        (read.map(drop), write.map(drop))
    });
    let (read_result, write_result) = handle.join().unwrap();
    assert!(read_result.is_ok());
    assert!(matches!(write_result, Err(LockError::Timeout { .. })));
    drop(read);
}

#[test]
#[serial]
fn test_upgrade_check_rejects_waiting_upgrade() {
    let fixture = LockFixture::with_config(LockManagerConfig {
        upgrade_check: true,
        ..LockManagerConfig::default()
    });
    let manager = fixture.manager();
    let read = manager.acquire_resource_read("/db/u.xml").unwrap();

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (held_tx, held_rx) = mpsc::channel();
    let other = fixture.manager();
    let (handle, _) = spawn_named("second-reader", move || {
        let _read = other.acquire_resource_read("/db/u.xml").unwrap();
        held_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });
    held_rx.recv().unwrap();

    let err = manager.acquire_resource_write("/db/u.xml").unwrap_err();
    assert!(matches!(err, LockError::UpgradeWouldDeadlock { .. }));
    assert!(err.is_retryable());

    release_tx.send(()).unwrap();
    handle.join().unwrap();
    // sole reader now: the upgrade is immediate
    let write = manager.acquire_resource_write("/db/u.xml").unwrap();
    drop(write);
    drop(read);
}

#[test]
#[serial]
fn test_interrupting_a_blocked_waiter_leaves_no_state() {
    let fixture = LockFixture::new();
    let manager = fixture.manager();
    let guard = manager.acquire_resource_write("/db/i.xml").unwrap();

    let other = fixture.manager();
    let (handle, waiter) = spawn_named("interrupted", move || {
        other.acquire_resource_read("/db/i.xml").map(drop)
    });
    assert!(wait_until(|| manager.detector().is_waiting_for(&waiter).is_some()));
    assert!(manager.interrupt(&waiter));

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(LockError::Interrupted { .. })));
    assert_eq!(manager.detector().waiting_count(), 0);
    let info = manager.snapshot_waiting_threads();
    assert!(info.is_empty());

    let lock = manager.resource_lock("/db/i.xml").unwrap();
    assert_eq!(lock.hold_count(LockMode::Read), 0);
    drop(guard);
    assert!(!manager.is_resource_locked_for_write("/db/i.xml"));
}

#[test]
#[serial]
fn test_queued_writer_is_not_starved_by_new_readers() {
    let fixture = LockFixture::new();
    let manager = fixture.manager();
    let first_reader = manager.acquire_resource_read("/db/s.xml").unwrap();

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let other = fixture.manager();
    let (writer, writer_ref) = spawn_named("queued-writer", move || {
        let guard = other.acquire_resource_write("/db/s.xml").unwrap();
        acquired_tx.send(()).unwrap();
        drop(guard);
    });
    assert!(wait_until(|| manager.detector().is_waiting_for(&writer_ref).is_some()));

    let other = fixture.manager();
    let (late, _) = spawn_named("late-reader", move || {
        other
            .acquire_resource_lock_timeout("/db/s.xml", LockMode::Read, Duration::from_millis(50))
            .map(drop)
    });
    assert!(matches!(late.join().unwrap(), Err(LockError::Timeout { .. })));

    drop(first_reader);
    acquired_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    writer.join().unwrap();
}

#[test]
#[serial]
fn test_collection_writer_excludes_descendant_readers() {
    let fixture = LockFixture::new();
    let manager = fixture.manager();
    let writer = manager.acquire_collection_write("/db/a").unwrap();

    let (tx, rx) = mpsc::channel();
    let other = fixture.manager();
    let (reader, _) = spawn_named("tree-reader", move || {
        let guard = other.acquire_collection_read("/db/a/b").unwrap();
        tx.send(guard.locks().len()).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(writer);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    reader.join().unwrap();
}

#[test]
#[serial]
fn test_multi_writer_siblings_proceed_together() {
    let fixture = LockFixture::with_config(LockManagerConfig {
        collections_multi_writer: true,
        ..LockManagerConfig::default()
    });
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["/db/left", "/db/right"]
        .iter()
        .map(|path| {
            let (manager, gate) = (fixture.manager(), Arc::clone(&barrier));
            let path = path.to_string();
            spawn_named(&format!("writer{}", path.replace('/', "-")), move || {
                let _guard = manager.acquire_collection_write(&path).unwrap();
                // both writers must hold their collection at the same time
                gate.wait();
            })
            .0
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!fixture.manager().is_collection_locked_for_read("/db"));
}
