// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock manager configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
pub use crate::trace::StackTraceDepth;

/// What a blocked request does when it finds itself closing a wait cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlockPolicy {
    /// Give up the request with `LockError::Deadlock`
    #[default]
    Abandon,
    /// Log the cycle once and keep waiting
    Report,
}

/// Configuration injected into a [`LockManager`](crate::manager::LockManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    /// Record the caller's stack in every lock owner record
    pub capture_stacks: bool,

    /// Stack frames attached to each lock event
    pub trace_stack_depth: StackTraceDepth,

    /// Drop every lock event before it reaches the listeners
    pub disable_events: bool,

    /// Track per-id read/write balance in the event table and log negatives
    pub sanity_check: bool,

    /// READ-lock (true) or WRITE-lock (false) the ancestors of a written collection
    pub collections_multi_writer: bool,

    /// Fail an upgrade that cannot be granted immediately instead of waiting
    pub upgrade_check: bool,

    /// Warn when a WRITE request has to wait for other threads' READ holds
    pub warn_wait_on_read_for_write: bool,

    pub deadlock_policy: DeadlockPolicy,

    /// How often a blocked thread re-walks the wait-for graph (milliseconds)
    pub deadlock_check_interval_ms: u64,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            capture_stacks: false,
            trace_stack_depth: StackTraceDepth::Disabled,
            disable_events: false,
            sanity_check: false,
            collections_multi_writer: false,
            upgrade_check: false,
            warn_wait_on_read_for_write: false,
            deadlock_policy: DeadlockPolicy::Abandon,
            deadlock_check_interval_ms: 100,
        }
    }
}

impl LockManagerConfig {
    /// Configuration for chasing locking bugs: stacks everywhere, checks on
    pub fn diagnostic() -> Self {
        Self {
            capture_stacks: true,
            trace_stack_depth: StackTraceDepth::Limited(8),
            sanity_check: true,
            upgrade_check: true,
            warn_wait_on_read_for_write: true,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: LockManagerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_stack_depth == StackTraceDepth::Limited(0) {
            return Err(ConfigError::Invalid(
                "trace_stack_depth must be at least 1 frame; use \"disabled\" to turn tracing off"
                    .to_string(),
            ));
        }
        if self.deadlock_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "deadlock_check_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn lock_settings(&self) -> LockSettings {
        LockSettings {
            capture_stacks: self.capture_stacks,
            upgrade_check: self.upgrade_check,
            warn_wait_on_read_for_write: self.warn_wait_on_read_for_write,
            deadlock_policy: self.deadlock_policy,
            deadlock_check_interval: Duration::from_millis(self.deadlock_check_interval_ms),
        }
    }
}

/// The part of the configuration each lock carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub capture_stacks: bool,
    pub upgrade_check: bool,
    pub warn_wait_on_read_for_write: bool,
    pub deadlock_policy: DeadlockPolicy,
    pub deadlock_check_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockManagerConfig::default().lock_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = LockManagerConfig::from_json_str(r#"{"collections_multi_writer": true}"#)
            .unwrap();
        assert!(config.collections_multi_writer);
        assert!(!config.capture_stacks);
        assert_eq!(config.deadlock_policy, DeadlockPolicy::Abandon);
        assert_eq!(config.deadlock_check_interval_ms, 100);
    }

    #[test]
    fn test_trace_depth_and_policy_parse() {
        let config = LockManagerConfig::from_json_str(
            r#"{"trace_stack_depth": {"limited": 5}, "deadlock_policy": "report"}"#,
        )
        .unwrap();
        assert_eq!(config.trace_stack_depth, StackTraceDepth::Limited(5));
        assert_eq!(config.deadlock_policy, DeadlockPolicy::Report);

        let full = LockManagerConfig::from_json_str(r#"{"trace_stack_depth": "full"}"#).unwrap();
        assert_eq!(full.trace_stack_depth, StackTraceDepth::Full);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let err = LockManagerConfig::from_json_str(r#"{"trace_stack_depth": {"limited": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = LockManagerConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.json");
        std::fs::write(&path, r#"{"sanity_check": true}"#).unwrap();
        let config = LockManagerConfig::load(&path).unwrap();
        assert!(config.sanity_check);

        let missing = LockManagerConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }

    #[test]
    fn test_diagnostic_preset_is_valid() {
        let config = LockManagerConfig::diagnostic();
        assert!(config.validate().is_ok());
        assert!(config.lock_settings().capture_stacks);
    }
}
