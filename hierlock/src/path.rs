// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock path handling
//!
//! Lock ids are absolute, slash-separated paths such as `/db/docs/a.xml`.

use crate::error::LockError;

/// Canonical form of `path`: leading slash, no empty segments, no trailing slash
pub fn normalize(path: &str) -> Result<String, LockError> {
    if !path.starts_with('/') {
        return Err(LockError::InvalidPath(format!(
            "'{}' is not absolute",
            path
        )));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(LockError::InvalidPath(format!("'{}' names no entity", path)));
    }
    if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
        return Err(LockError::InvalidPath(format!(
            "'{}' contains relative segment '{}'",
            path, bad
        )));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Every collection on the way to `path`, root first: `/db/a` -> `/db`, `/db/a`
pub fn collection_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for part in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(part);
        segments.push(current.clone());
    }
    segments
}
