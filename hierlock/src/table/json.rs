// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Listener that records lock events as a JSON document
//!
//! Each registration appends one document of the form
//! `{"lockEvents":[<event>,<event>,...]}` to the output file. The document
//! is opened by `registered()` and completed by `unregistered()` (or when
//! the listener is dropped). Events outside that window are dropped. When a
//! write fails midway the listener still tries to terminate the document
//! before it stops writing.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{LockEvent, LockEventListener, LOG_TARGET};

enum Output {
    Closed,
    Open {
        writer: BufWriter<File>,
        empty: bool,
    },
    /// An I/O error occurred; nothing more is written
    Failed,
}

pub struct JsonLockEventListener {
    path: PathBuf,
    output: Mutex<Output>,
}

impl JsonLockEventListener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output: Mutex::new(Output::Closed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once an I/O error has put the listener into its non-writing state
    pub fn is_failed(&self) -> bool {
        matches!(*self.output.lock(), Output::Failed)
    }

    fn open(&self) -> std::io::Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"{\"lockEvents\":[")?;
        Ok(writer)
    }

    /// Append one event; on a write error, try to close the document
    fn append_event<W: Write>(writer: &mut W, empty: bool, event: &LockEvent) -> std::io::Result<()> {
        let record = serde_json::to_vec(event)?;
        let written = Self::write_record(writer, empty, &record);
        if written.is_err() {
            let _ = Self::close(writer);
        }
        written
    }

    fn write_record<W: Write>(writer: &mut W, empty: bool, record: &[u8]) -> std::io::Result<()> {
        if !empty {
            writer.write_all(b",")?;
        }
        writer.write_all(record)
    }

    fn close<W: Write>(writer: &mut W) -> std::io::Result<()> {
        writer.write_all(b"]}\n")?;
        writer.flush()
    }

    fn fail(&self, output: &mut Output, action: &str, err: std::io::Error) {
        log::error!(
            target: LOG_TARGET,
            "Lock event file {} failed to {}: {}; no further events will be written",
            self.path.display(),
            action,
            err
        );
        *output = Output::Failed;
    }

    fn finish(&self, output: &mut Output) {
        if let Output::Open { writer, .. } = &mut *output {
            match Self::close(writer) {
                Ok(()) => *output = Output::Closed,
                Err(err) => self.fail(output, "close", err),
            }
        }
    }
}

impl LockEventListener for JsonLockEventListener {
    fn registered(&self) {
        let mut output = self.output.lock();
        if !matches!(*output, Output::Closed) {
            return;
        }
        match self.open() {
            Ok(writer) => *output = Output::Open { writer, empty: true },
            Err(err) => self.fail(&mut output, "open", err),
        }
    }

    fn accept(&self, event: &LockEvent) {
        let mut output = self.output.lock();
        if let Output::Open { writer, empty } = &mut *output {
            match Self::append_event(writer, *empty, event) {
                Ok(()) => *empty = false,
                Err(err) => self.fail(&mut output, "write", err),
            }
        }
    }

    fn unregistered(&self) {
        let mut output = self.output.lock();
        self.finish(&mut output);
    }
}

impl Drop for JsonLockEventListener {
    fn drop(&mut self) {
        let mut output = self.output.lock();
        self.finish(&mut output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockMode, LockType};
    use crate::table::{LockAction, LockDescriptor};
    use std::io;

    /// Rejects its first `failures` writes, then accepts everything
    struct FlakyWriter {
        out: Vec<u8>,
        failures: usize,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn event(action: LockAction, hold_count: usize) -> LockEvent {
        LockEvent {
            timestamp: 1,
            action,
            group_id: 9,
            id: "/db/a.xml".to_string(),
            thread: "main".to_string(),
            trace: Vec::new(),
            lock: LockDescriptor {
                lock_type: LockType::Resource,
                mode: LockMode::Read,
                hold_count,
            },
        }
    }

    #[test]
    fn test_document_is_complete_after_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let listener = JsonLockEventListener::new(dir.path().join("events.json"));
        listener.accept(&event(LockAction::Attempt, 1));
        listener.registered();
        listener.accept(&event(LockAction::Acquired, 1));
        listener.accept(&event(LockAction::Released, 0));
        listener.unregistered();
        listener.accept(&event(LockAction::Attempt, 1));

        let text = std::fs::read_to_string(listener.path()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = doc["lockEvents"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["lock"]["holdCount"], 0);
    }

    #[test]
    fn test_empty_registration_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let listener = JsonLockEventListener::new(&path);
        listener.registered();
        listener.unregistered();
        listener.registered();
        listener.accept(&event(LockAction::Acquired, 1));
        drop(listener);

        let text = std::fs::read_to_string(&path).unwrap();
        let docs: Vec<serde_json::Value> = serde_json::Deserializer::from_str(&text)
            .into_iter::<serde_json::Value>()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0]["lockEvents"].as_array().unwrap().is_empty());
        assert_eq!(docs[1]["lockEvents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_write_still_terminates_document() {
        let mut writer = FlakyWriter {
            out: b"{\"lockEvents\":[".to_vec(),
            failures: 0,
        };
        JsonLockEventListener::append_event(&mut writer, true, &event(LockAction::Acquired, 1))
            .unwrap();

        writer.failures = 1;
        let err = JsonLockEventListener::append_event(&mut writer, false, &event(LockAction::Released, 0))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        let doc: serde_json::Value = serde_json::from_slice(&writer.out).unwrap();
        let events = doc["lockEvents"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "ACQUIRED");
    }

    #[test]
    fn test_open_failure_degrades_quietly() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for appending
        let listener = JsonLockEventListener::new(dir.path());
        listener.registered();
        assert!(listener.is_failed());
        listener.accept(&event(LockAction::Attempt, 1));
        listener.unregistered();
        assert!(listener.is_failed());
    }
}
