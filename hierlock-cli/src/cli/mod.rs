// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for Hierlock
//!
//! Offline inspection of lock event files written by the JSON listener,
//! and a small demo that provokes and breaks a deadlock.

pub mod commands;
pub mod demo;
pub mod inspect;
pub mod output;

pub use commands::{Cli, Commands};
pub use demo::handle_demo;
pub use inspect::handle_inspect;
