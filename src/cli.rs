// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::parse_duration;

/// Command-line arguments for `dbx-tester`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbx-tester",
    version,
    about = "Run dependent Databricks jobs as test processes and report their outcome.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (TOML).
    ///
    /// Default: `DbxTester.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "DbxTester.toml")]
    pub config: String,

    /// Run only the named test. May be repeated; all tests run when omitted.
    #[arg(long = "test", value_name = "NAME")]
    pub tests: Vec<String>,

    /// Parse + validate, print the execution graphs, but start nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Stop every live process after this long (e.g. `30m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub deadline: Option<Duration>,

    /// Override `[settings].poll_interval` (e.g. `5s`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DBX_TESTER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
