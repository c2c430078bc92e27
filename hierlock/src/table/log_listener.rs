// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Listener that writes lock events to the log

use super::{LockEvent, LockEventListener, LOG_TARGET};

/// Logs every event at a fixed level under the lock table's log target
#[derive(Debug, Clone, Copy)]
pub struct LogLockEventListener {
    level: log::Level,
}

impl LogLockEventListener {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> log::Level {
        self.level
    }
}

impl Default for LogLockEventListener {
    fn default() -> Self {
        Self::new(log::Level::Trace)
    }
}

impl LockEventListener for LogLockEventListener {
    fn accept(&self, event: &LockEvent) {
        log::log!(target: LOG_TARGET, self.level, "{}", event);
    }
}
