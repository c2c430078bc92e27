// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Hierlock CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // -v/--verbose wins over --log-level; RUST_LOG still applies per target
    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "Hierlock".bold().green(), hierlock::VERSION);
            println!("Hierarchical lock manager with deadlock detection");
            Ok(())
        }

        Commands::Inspect { file, format, id } => cli::handle_inspect(file, format, id),

        Commands::Demo { events, config } => cli::handle_demo(events, config),
    }
}
