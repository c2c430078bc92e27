// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Call stack capture for lock owner records and lock events
//!
//! Frames are parsed out of `std::backtrace::Backtrace`'s textual form. The
//! frames of the capture machinery and of the lock plumbing are skipped, so
//! the first frame reported is the code that asked for the lock.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;

static FRAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+:\s+(?P<symbol>.+?)\s*$").expect("valid frame regex"));
static LOCATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$").expect("valid location regex")
});
static SYMBOL_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("valid hash regex"));

/// Symbol prefixes that belong to the runtime or to the lock plumbing
const INTERNAL_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "hierlock::trace::",
    "hierlock::lock::",
    "<hierlock::lock::",
    "hierlock::table::LockEventTable",
    "hierlock::manager::LockManager",
    "hierlock::manager::ManagedLock",
    "<hierlock::manager::ManagedLock",
];

/// How many frames to attach to each lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackTraceDepth {
    /// No stack capture (the capture is expensive)
    #[default]
    Disabled,
    /// At most this many caller frames
    Limited(usize),
    /// Every caller frame
    Full,
}

impl StackTraceDepth {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, StackTraceDepth::Disabled)
    }
}

/// One frame of a captured call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub method_name: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

impl StackFrame {
    fn from_symbol(symbol: &str) -> Self {
        let symbol = SYMBOL_HASH.replace(symbol, "");
        match symbol.rsplit_once("::") {
            Some((class_name, method_name)) => StackFrame {
                method_name: method_name.to_string(),
                class_name: class_name.to_string(),
                line_number: None,
            },
            None => StackFrame {
                method_name: symbol.to_string(),
                class_name: String::new(),
                line_number: None,
            },
        }
    }

    fn symbol(&self) -> String {
        if self.class_name.is_empty() {
            self.method_name.clone()
        } else {
            format!("{}::{}", self.class_name, self.method_name)
        }
    }
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line_number {
            Some(line) => write!(f, "{}({})", self.symbol(), line),
            None => f.write_str(&self.symbol()),
        }
    }
}

/// Capture the caller's stack, or `None` when capture is disabled
pub fn capture(depth: StackTraceDepth) -> Option<Vec<StackFrame>> {
    if !depth.is_enabled() {
        return None;
    }
    let rendered = Backtrace::force_capture().to_string();
    Some(caller_frames(parse_frames(&rendered), depth))
}

/// Parse the textual form of a `std::backtrace::Backtrace`
pub fn parse_frames(rendered: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in rendered.lines() {
        if let Some(caps) = FRAME_LINE.captures(line) {
            frames.push(StackFrame::from_symbol(&caps["symbol"]));
        } else if let Some(caps) = LOCATION_LINE.captures(line) {
            if let Some(frame) = frames.last_mut() {
                if frame.line_number.is_none() {
                    frame.line_number = caps["line"].parse().ok();
                }
            }
        }
    }
    frames
}

fn is_internal(frame: &StackFrame) -> bool {
    let symbol = frame.symbol();
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

/// Drop the leading internal frames and apply the depth limit
fn caller_frames(frames: Vec<StackFrame>, depth: StackTraceDepth) -> Vec<StackFrame> {
    let external = frames.into_iter().skip_while(is_internal);
    match depth {
        StackTraceDepth::Disabled => Vec::new(),
        StackTraceDepth::Limited(n) => external.take(n).collect(),
        StackTraceDepth::Full => external.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::create
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   2: hierlock::trace::capture
             at ./hierlock/src/trace.rs:101:20
   3: hierlock::table::LockEventTable::event
             at ./hierlock/src/table/mod.rs:210:26
   4: store::broker::NativeBroker::open_collection::h0123456789abcdef
             at ./store/src/broker.rs:88:9
   5: store::main
   6: core::ops::function::FnOnce::call_once
             at /rustc/abc/library/core/src/ops/function.rs:250:5";

    #[test]
    fn test_parse_frames_reads_symbols_and_lines() {
        let frames = parse_frames(RENDERED);
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[2].class_name, "hierlock::trace");
        assert_eq!(frames[2].method_name, "capture");
        assert_eq!(frames[2].line_number, Some(101));
        assert_eq!(frames[5].line_number, None);
    }

    #[test]
    fn test_symbol_hash_is_stripped() {
        let frames = parse_frames(RENDERED);
        assert_eq!(frames[4].class_name, "store::broker::NativeBroker");
        assert_eq!(frames[4].method_name, "open_collection");
        assert_eq!(frames[4].to_string(), "store::broker::NativeBroker::open_collection(88)");
    }

    #[test]
    fn test_caller_frames_skip_internal_prefix() {
        let frames = caller_frames(parse_frames(RENDERED), StackTraceDepth::Full);
        assert_eq!(frames[0].method_name, "open_collection");
        assert_eq!(frames.len(), 3);

        let limited = caller_frames(parse_frames(RENDERED), StackTraceDepth::Limited(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].symbol(), "store::main");
    }

    #[test]
    fn test_capture_disabled_returns_none() {
        assert!(capture(StackTraceDepth::Disabled).is_none());
        let limited = capture(StackTraceDepth::Limited(4)).unwrap();
        assert!(limited.len() <= 4);
    }

    #[test]
    fn test_frame_serializes_camel_case() {
        let frame = StackFrame {
            method_name: "open".into(),
            class_name: "store::Broker".into(),
            line_number: Some(12),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["methodName"], "open");
        assert_eq!(json["className"], "store::Broker");
        assert_eq!(json["lineNumber"], 12);
    }
}
