//! CLI command definitions

use clap::Args;
use serde_json::Value;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Parameter overrides (key=value, value parsed as JSON when possible)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, Value)>,

    /// Maximum concurrently running steps (overrides the file)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Default retry budget (overrides the file)
    #[arg(long)]
    pub retries: Option<usize>,

    /// Disable caching for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Keep artifacts and cache only in memory
    #[arg(long)]
    pub ephemeral: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Build a pipeline and print its DAG without running it
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Parameter overrides (key=value)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, Value)>,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Preview or run a pipeline's cron schedule
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Print the next N fire times
    #[arg(long, default_value_t = 5)]
    pub preview: usize,

    /// Keep running and trigger the pipeline on schedule
    #[arg(long)]
    pub run: bool,
}

/// Parse key=value pairs. The value is read as JSON, falling back to a string.
pub fn parse_key_value(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid key=value pair: {}", s))?;
    if key.is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
