//! Command-Line Interface (CLI) logic.

mod agent;
mod serve;
mod setup;

use clap::{Parser, Subcommand};
use log::LevelFilter;

/// CLI configuration options.
#[derive(Debug, Parser)]
#[command(name = "redflag", version, about = "Fleet update-management control plane")]
pub(crate) struct CliOptions {
    /// Verbosity level (higher is more verbose).
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// CLI sub-command.
    #[command(subcommand)]
    pub(crate) cmd: CliCommand,
}

impl CliOptions {
    /// Returns the log-level set via command-line flags.
    pub(crate) fn loglevel(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Dispatch CLI subcommand.
    pub(crate) fn run(self) -> anyhow::Result<()> {
        match self.cmd {
            CliCommand::Serve(cmd) => cmd.run(),
            CliCommand::Agent(cmd) => cmd.run(),
            CliCommand::Setup(cmd) => cmd.run(),
        }
    }
}

/// CLI sub-commands.
#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Run the coordinator HTTP service.
    Serve(serve::Cmd),
    /// Long-running per-host update agent.
    Agent(agent::Cmd),
    /// First-run wizard: materialize config and admin credentials.
    Setup(setup::Cmd),
}

