// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// kiln: industrial telemetry backbone for PLC fleets.
#[derive(Debug, Parser)]
#[command(name = "kiln", version, about)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text (default).
    Text,
    /// JSON lines, for log aggregation.
    Json,
    /// Minimal single-line output.
    Compact,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the backbone.
    Run {
        /// Path to the configuration file (.yaml, .yml or .toml).
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Load and validate a configuration file, then exit.
    Validate {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print version information.
    Version,
}
