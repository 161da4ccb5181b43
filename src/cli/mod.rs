//! Command-line interface for pipeforge.
//!
//! Provides commands for pipeline synthesis, replay, validation, and ledger
//! maintenance.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
