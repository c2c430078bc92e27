// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock event file inspection
//!
//! A file written by the JSON listener holds one `{"lockEvents":[...]}`
//! document per registration, appended one after another.

use colored::Colorize;
use hierlock::{LockAction, LockEvent, LockType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::commands::OutputFormat;
use super::output::SummaryFormatter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDocument {
    lock_events: Vec<LockEvent>,
}

/// Totals for one lock across every event in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSummary {
    pub id: String,
    pub lock_type: LockType,
    pub attempts: usize,
    pub acquired: usize,
    pub released: usize,
    pub failed: usize,
    /// Highest per-thread hold count seen on an ACQUIRED event
    pub peak_hold_count: usize,
    pub threads: BTreeSet<String>,
}

impl LockSummary {
    fn new(id: &str, lock_type: LockType) -> Self {
        Self {
            id: id.to_string(),
            lock_type,
            attempts: 0,
            acquired: 0,
            released: 0,
            failed: 0,
            peak_hold_count: 0,
            threads: BTreeSet::new(),
        }
    }

    /// Every acquisition has a matching release
    pub fn is_balanced(&self) -> bool {
        self.acquired == self.released
    }

    /// Attempts that neither succeeded nor failed within the file
    pub fn pending(&self) -> usize {
        self.attempts.saturating_sub(self.acquired + self.failed)
    }
}

/// Read every event of every document in `path`, in file order
pub fn load_events(path: &Path) -> Result<Vec<LockEvent>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let mut events = Vec::new();
    for (index, document) in serde_json::Deserializer::from_str(&text)
        .into_iter::<EventDocument>()
        .enumerate()
    {
        let document = document
            .map_err(|e| format!("Malformed document #{} in {}: {}", index + 1, path.display(), e))?;
        events.extend(document.lock_events);
    }
    log::debug!("Loaded {} lock events from {}", events.len(), path.display());
    Ok(events)
}

/// Per-lock totals, ordered by id then type
pub fn summarize(events: &[LockEvent]) -> Vec<LockSummary> {
    let mut summaries: BTreeMap<(String, LockType), LockSummary> = BTreeMap::new();
    for event in events {
        let summary = summaries
            .entry((event.id.clone(), event.lock.lock_type))
            .or_insert_with(|| LockSummary::new(&event.id, event.lock.lock_type));
        summary.threads.insert(event.thread.clone());
        match event.action {
            LockAction::Attempt => summary.attempts += 1,
            LockAction::AttemptFailed => summary.failed += 1,
            LockAction::Released => summary.released += 1,
            LockAction::Acquired => {
                summary.acquired += 1;
                summary.peak_hold_count = summary.peak_hold_count.max(event.lock.hold_count);
            }
        }
    }
    summaries.into_values().collect()
}

/// Handle the inspect command
pub fn handle_inspect(
    file: PathBuf,
    format: OutputFormat,
    id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = load_events(&file)?;

    if let Some(id) = id {
        let timeline: Vec<LockEvent> = events.into_iter().filter(|e| e.id == id).collect();
        if timeline.is_empty() && format == OutputFormat::Table {
            println!("{}", format!("No events for {}", id).yellow());
            return Ok(());
        }
        print!("{}", SummaryFormatter::format_timeline(&timeline, format));
        return Ok(());
    }

    let summaries = summarize(&events);
    print!("{}", SummaryFormatter::format_summaries(&summaries, format));

    let unbalanced: Vec<&LockSummary> = summaries.iter().filter(|s| !s.is_balanced()).collect();
    if !unbalanced.is_empty() && format == OutputFormat::Table {
        println!("\n{}", "Unbalanced locks:".bold().yellow());
        for summary in unbalanced {
            println!(
                "  {} {} acquired {} released {}",
                summary.lock_type,
                summary.id.yellow(),
                summary.acquired,
                summary.released
            );
        }
    }
    Ok(())
}
