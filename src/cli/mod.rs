//! Command-line interface for swe-crew.
//!
//! Provides the batch `run` command and `config` for inspecting the
//! effective configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, OutputFormat};
