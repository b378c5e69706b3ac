//! CLI module for cuantizar
//!
//! Command handlers and log setup for the `cuantizar` binary.

mod commands;
mod logging;

pub use commands::run_command;
pub use logging::{init_tracing, restrict_to_warnings, LogLevel};

// Re-export Cli from config for convenience
pub use crate::config::Cli;
