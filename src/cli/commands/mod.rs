//! CLI command implementations

mod export;
mod train;

use crate::cli::{init_tracing, LogLevel};
use crate::config::{Cli, Command};
use crate::Result;

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<()> {
    init_tracing(LogLevel::from_flags(cli.quiet, cli.verbose));

    match cli.command {
        Command::Train(args) => train::run_train(args),
        Command::Export(args) => export::run_export(args),
    }
}
