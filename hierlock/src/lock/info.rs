// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Point-in-time description of a lock for operator reports

use serde::Serialize;
use std::fmt;

use super::{LockMode, LockType};

/// Snapshot of a lock's holders and waiters
///
/// `lock_mode` is WRITE while a writer holds the lock, READ otherwise; the
/// `owners` are the writer in the first case and the readers in the second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub lock_type: LockType,
    pub lock_mode: LockMode,
    pub id: String,
    pub owners: Vec<String>,
    pub read_locks: Vec<String>,
    pub waiting_for_read: Vec<String>,
    pub waiting_for_write: Vec<String>,
}

impl LockInfo {
    /// Write the indented block that follows a `Thread:` line in a waiting-thread dump
    pub fn debug(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "           Lock type: {}", self.lock_type)?;
        writeln!(out, "           Lock mode: {}", self.lock_mode)?;
        writeln!(out, "             Lock id: {}", self.id)?;
        writeln!(out, "            Held by: [{}]", self.owners.join(", "))?;
        writeln!(out, "  Waiting for read: [{}]", self.waiting_for_read.join(", "))?;
        writeln!(out, " Waiting for write: [{}]", self.waiting_for_write.join(", "))
    }
}
