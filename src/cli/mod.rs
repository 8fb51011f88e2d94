//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, PlanCommand, RunCommand, ScheduleCommand, ValidateCommand};
use std::ffi::OsString;

/// ML pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "orchestra")]
#[command(version = "0.1.0")]
#[command(about = "Run cached, scheduled ML pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// SQLite database for artifacts, cache and history
    #[arg(long, global = true)]
    pub db: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show the DAG a pipeline builds into
    Plan(PlanCommand),

    /// Show run history
    History(HistoryCommand),

    /// Preview or run a pipeline schedule
    Schedule(ScheduleCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
