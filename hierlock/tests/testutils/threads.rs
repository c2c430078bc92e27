//! Thread helpers for multi-thread lock scenarios

use hierlock::ThreadRef;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Install a test logger once; later calls are no-ops
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or five seconds pass
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Spawn a named thread and return its handle together with its `ThreadRef`
pub fn spawn_named<T, F>(name: &str, f: F) -> (JoinHandle<T>, ThreadRef)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            // the receiver outlives this send
            let _ = tx.send(ThreadRef::current());
            f()
        })
        .expect("spawn test thread");
    let thread = rx.recv().expect("thread reports its ThreadRef");
    (handle, thread)
}
