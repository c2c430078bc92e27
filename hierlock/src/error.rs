// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock manager error types

use thiserror::Error;

use crate::lock::LockMode;

/// Errors returned by lock acquisition and release
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Interrupted while waiting for {mode} lock on {id} (thread {thread})")]
    Interrupted {
        id: String,
        mode: LockMode,
        thread: String,
    },

    #[error("Deadlock detected: {thread} abandoned its {mode} request for {id}; wait cycle: [{}]", cycle.join(", "))]
    Deadlock {
        id: String,
        mode: LockMode,
        thread: String,
        cycle: Vec<String>,
    },

    #[error("Timed out waiting for {mode} lock on {id}")]
    Timeout { id: String, mode: LockMode },

    #[error("Thread {thread} released a {mode} lock on {id} it does not hold")]
    NotHeld {
        id: String,
        mode: LockMode,
        thread: String,
    },

    #[error("Lock upgrading would lead to a self-deadlock: {id}")]
    UpgradeWouldDeadlock { id: String },

    #[error("Invalid lock path: {0}")]
    InvalidPath(String),
}

impl LockError {
    /// The id of the lock the error refers to, if any
    pub fn lock_id(&self) -> Option<&str> {
        match self {
            LockError::Interrupted { id, .. }
            | LockError::Deadlock { id, .. }
            | LockError::Timeout { id, .. }
            | LockError::NotHeld { id, .. }
            | LockError::UpgradeWouldDeadlock { id } => Some(id),
            LockError::InvalidPath(_) => None,
        }
    }

    /// True when the caller should release what it holds and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::Deadlock { .. }
                | LockError::Timeout { .. }
                | LockError::UpgradeWouldDeadlock { .. }
        )
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlock_message_lists_cycle() {
        let err = LockError::Deadlock {
            id: "/db/a.xml".to_string(),
            mode: LockMode::Write,
            thread: "t3".to_string(),
            cycle: vec!["t1".to_string(), "t2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("/db/a.xml"));
        assert!(msg.contains("[t1, t2]"));
        assert!(msg.contains("WRITE"));
        assert!(err.is_retryable());
        assert_eq!(err.lock_id(), Some("/db/a.xml"));
    }

    #[test]
    fn test_not_held_is_not_retryable() {
        let err = LockError::NotHeld {
            id: "/db".to_string(),
            mode: LockMode::Read,
            thread: "main".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(LockError::InvalidPath("db".into()).lock_id().is_none());
    }
}
