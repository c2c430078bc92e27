// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock owner record

use crate::thread::ThreadRef;
use crate::trace::{self, StackFrame, StackTraceDepth};

/// One hold of a lock by a thread, with the caller's stack when captured
#[derive(Debug, Clone)]
pub struct LockOwner {
    thread: ThreadRef,
    stack: Option<Vec<StackFrame>>,
}

impl LockOwner {
    pub fn new(thread: ThreadRef, capture_stack: bool) -> Self {
        let stack = if capture_stack {
            trace::capture(StackTraceDepth::Full)
        } else {
            None
        };
        LockOwner { thread, stack }
    }

    pub fn thread(&self) -> &ThreadRef {
        &self.thread
    }

    pub fn stack(&self) -> Option<&[StackFrame]> {
        self.stack.as_deref()
    }

    pub fn is(&self, thread: &ThreadRef) -> bool {
        &self.thread == thread
    }
}
