// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use hierlock::{LockAction, LockEvent};

use super::commands::OutputFormat;
use super::inspect::LockSummary;

/// Formatter for inspection results
pub struct SummaryFormatter;

impl SummaryFormatter {
    /// Format per-lock totals in the specified format
    pub fn format_summaries(summaries: &[LockSummary], format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::summaries_table(summaries),
            OutputFormat::Json => Self::to_json(&summaries),
        }
    }

    /// Format the events of a single lock in the specified format
    pub fn format_timeline(events: &[LockEvent], format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::timeline_table(events),
            OutputFormat::Json => Self::to_json(&events),
        }
    }

    fn summaries_table(summaries: &[LockSummary]) -> String {
        if summaries.is_empty() {
            return format!("{}\n", "No lock events found".yellow());
        }

        let mut output = String::new();
        output.push_str(&format!("{}\n", "Lock Summary".bold().green()));
        output.push_str(&format!("Locks: {}\n\n", summaries.len()));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            [
                "Lock", "Type", "Attempts", "Acquired", "Released", "Failed", "Peak", "Threads",
            ]
            .iter()
            .map(|h| Cell::new(h).fg(Color::Green)),
        );

        for summary in summaries {
            let released = if summary.is_balanced() {
                Cell::new(summary.released)
            } else {
                Cell::new(summary.released).fg(Color::Yellow)
            };
            table.add_row(vec![
                Cell::new(&summary.id),
                Cell::new(summary.lock_type),
                Cell::new(summary.attempts),
                Cell::new(summary.acquired),
                released,
                Cell::new(summary.failed),
                Cell::new(summary.peak_hold_count),
                Cell::new(summary.threads.iter().cloned().collect::<Vec<_>>().join(", ")),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    fn timeline_table(events: &[LockEvent]) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            ["Time", "Action", "Group", "Mode", "Count", "Thread"]
                .iter()
                .map(|h| Cell::new(h).fg(Color::Green)),
        );

        for event in events {
            let action = match event.action {
                LockAction::AttemptFailed => Cell::new(event.action).fg(Color::Red),
                LockAction::Acquired => Cell::new(event.action).fg(Color::Green),
                _ => Cell::new(event.action),
            };
            table.add_row(vec![
                Cell::new(Self::format_timestamp(event.timestamp)),
                action,
                Cell::new(event.group_id),
                Cell::new(event.lock.mode),
                Cell::new(event.lock.hold_count),
                Cell::new(&event.thread),
            ]);
        }

        format!("{}\n", table)
    }

    fn format_timestamp(millis: i64) -> String {
        chrono::DateTime::from_timestamp_millis(millis)
            .map(|time| time.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| millis.to_string())
    }

    fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
        match serde_json::to_string_pretty(value) {
            Ok(json) => format!("{}\n", json),
            Err(e) => format!("{{\"status\": \"error\", \"error\": \"{}\"}}\n", e),
        }
    }
}
