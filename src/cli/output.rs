//! CLI output formatting

use crate::{
    core::{NodeState, RunStatus},
    execution::{ExecutionEvent, NodeReport, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static RECYCLE: Emoji<'_, '_> = Emoji("♻️  ", "= ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "@ ");

/// Create a progress bar over the nodes of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a node state for display
pub fn format_node_state(state: &NodeState) -> String {
    match state {
        NodeState::Pending => style("PENDING").dim().to_string(),
        NodeState::Ready => style("READY").dim().to_string(),
        NodeState::CacheHit => style("CACHED").cyan().to_string(),
        NodeState::Dispatched { attempt } => {
            style(format!("RUNNING (attempt {})", attempt)).yellow().to_string()
        }
        NodeState::Succeeded => style("SUCCEEDED").green().to_string(),
        NodeState::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({} run, {} cached, {} failed of {}) - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline).bold(),
        format_status(summary.status),
        summary.succeeded,
        summary.cached,
        summary.failed,
        summary.total_nodes,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format one line of a run report
pub fn format_node_report(node: &NodeReport) -> String {
    let mut line = format!(
        "  {:<24} {}",
        style(&node.id).bold(),
        format_node_state(&node.state)
    );
    if node.attempts > 1 {
        line.push_str(&format!(" {}", style(format!("after {} attempts", node.attempts)).dim()));
    }
    if let Some(version) = &node.model_version {
        line.push_str(&format!(" {}", style(format!("model v{}", version)).cyan()));
    }
    if let Some(error) = &node.error {
        line.push_str(&format!("\n      {}", style(error).red()));
    }
    line
}

/// Per-node breakdown of a finished run
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines: Vec<String> = report.nodes.iter().map(format_node_report).collect();
    if let Some(fatal) = &report.fatal_error {
        lines.push(format!("{} {}", WARN, style(fatal).red()));
    }
    lines.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline,
            nodes,
        } => format!(
            "{} Starting pipeline {} ({}, {} nodes)",
            ROCKET,
            style(pipeline).bold(),
            style(short_id(run_id)).dim(),
            nodes
        ),
        ExecutionEvent::NodeCacheHit { node_id } => {
            format!("{} {} {}", RECYCLE, style(node_id).cyan(), style("(cached)").dim())
        }
        ExecutionEvent::NodeDispatched { node_id, attempt } => {
            if *attempt > 1 {
                format!(
                    "{} {} (attempt {})",
                    SPINNER,
                    style(node_id).cyan(),
                    style(attempt).dim()
                )
            } else {
                format!("{} {}", SPINNER, style(node_id).cyan())
            }
        }
        ExecutionEvent::NodeRetrying {
            node_id,
            attempt,
            error,
        } => format!(
            "{} {} failed attempt {}: {}",
            WARN,
            style(node_id).yellow(),
            attempt,
            style(error).dim()
        ),
        ExecutionEvent::NodeSucceeded { node_id, .. } => {
            format!("{} {}", CHECK, style(node_id).green())
        }
        ExecutionEvent::NodeFailed { node_id, error } => {
            format!("{} {}: {}", CROSS, style(node_id).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                RunStatus::Succeeded => format!("{} completed", style("successfully").green()),
                RunStatus::Failed => style("failed").red().to_string(),
                other => format_status(*other),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(short_id(run_id)).dim(),
                status_str
            )
        }
    }
}

/// Whether the event finishes a node, for progress accounting
pub fn finishes_node(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::NodeCacheHit { .. }
            | ExecutionEvent::NodeSucceeded { .. }
            | ExecutionEvent::NodeFailed { .. }
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
