use anyhow::{Context, Result};
use chrono::Utc;
use orchestra::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ScheduleCommand, ValidateCommand};
use orchestra::cli::output::*;
use orchestra::cli::{Cli, Command};
use orchestra::core::config::PipelineConfig;
use orchestra::execution::{CancellationHandle, Orchestrator, OrchestratorBuilder};
use orchestra::graph::build;
use orchestra::integrations::{InMemoryModelRegistry, LogTracker};
use orchestra::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use orchestra::schedule::{ScheduleRunner, ScheduleTranslator};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
        Command::Schedule(cmd) => schedule_pipeline(cmd, &cli).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(cli: &Cli) -> Result<Arc<orchestra::persistence::SqliteStore>> {
    use orchestra::persistence::SqliteStore;

    let store = match &cli.db {
        Some(path) => SqliteStore::new(path).await?,
        None => SqliteStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

/// Wire storage, history and sinks into an orchestrator
async fn orchestrator_for(
    config: &PipelineConfig,
    cli: &Cli,
    ephemeral: bool,
    no_history: bool,
) -> Result<(Orchestrator, Arc<dyn PersistenceBackend>)> {
    let registry = config.to_registry()?;
    let mut builder: OrchestratorBuilder = Orchestrator::builder(registry)
        .config(config.run_config())
        .model_registry(Arc::new(InMemoryModelRegistry::new()));

    for tracker in config.steps.iter().filter_map(|s| s.experiment_tracker.as_ref()) {
        builder = builder.tracker(tracker.clone(), Arc::new(LogTracker));
    }

    let history: Arc<dyn PersistenceBackend>;
    #[cfg(feature = "sqlite")]
    {
        if ephemeral {
            history = Arc::new(InMemoryPersistence::new());
        } else {
            let store = open_store(cli).await?;
            builder = builder.storage(store.clone());
            history = store;
        }
    }
    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (cli, ephemeral);
        history = Arc::new(InMemoryPersistence::new());
    }

    if !no_history {
        builder = builder.history(history.clone());
    }

    Ok((builder.build(), history))
}

fn cancel_on_ctrl_c() -> CancellationHandle {
    let cancel = CancellationHandle::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            handle.cancel();
        }
    });
    cancel
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let pipeline = config.to_pipeline()?;
    let parameters: BTreeMap<String, Value> = cmd.params.iter().cloned().collect();
    for (key, value) in &parameters {
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut run_config = config.run_config();
    if let Some(concurrency) = cmd.concurrency {
        run_config.concurrency = concurrency;
    }
    if let Some(retries) = cmd.retries {
        run_config.default_retries = retries;
    }
    if cmd.no_cache {
        run_config.enable_cache = false;
    }

    let (orchestrator, _) = orchestrator_for(&config, cli, cmd.ephemeral, cmd.no_history).await?;

    // Set up event handler for console output
    let progress = create_progress_bar(pipeline.invocations.len());
    let bar = progress.clone();
    orchestrator
        .add_event_handler(move |event| {
            bar.println(format_execution_event(&event));
            if finishes_node(&event) {
                bar.inc(1);
            }
        })
        .await;

    println!();
    let cancel = cancel_on_ctrl_c();
    let report = orchestrator
        .run_with(&pipeline, &parameters, &run_config, &cancel)
        .await?;
    progress.finish_and_clear();

    println!("\n{}", format_run_report(&report));
    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&report.run_id.to_string()[..8]).dim()
        );
    }

    let duration = report.duration().to_std().unwrap_or_default();
    if report.is_success() {
        println!(
            "\n{} {} completed {} in {}",
            CHECK,
            style(&report.pipeline).bold(),
            style("successfully").green(),
            format_duration(duration)
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&report.pipeline).bold(),
            format_status(report.status)
        );
        if let Some(fatal) = &report.fatal_error {
            error!("{}", fatal);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let registry = config.to_registry()?;
        let pipeline = config.to_pipeline()?;
        build(&pipeline, &registry, &BTreeMap::new())?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Invocations: {}", style(config.invocations.len()).cyan());
            println!("  Parameters: {}", style(config.parameters.len()).cyan());
            if let Some(schedule) = &config.schedule {
                println!("  Schedule: {}", style(&schedule.cron).cyan());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let registry = config.to_registry()?;
    let pipeline = config.to_pipeline()?;
    let parameters: BTreeMap<String, Value> = cmd.params.iter().cloned().collect();

    let dag = build(&pipeline, &registry, &parameters)?;

    println!(
        "{} {} builds into {} nodes and {} edges",
        INFO,
        style(&dag.pipeline).bold(),
        style(dag.len()).cyan(),
        style(dag.edges().len()).cyan()
    );
    for id in dag.topological_order() {
        let Some(node) = dag.node(&id) else { continue };
        let upstream: Vec<&str> = node
            .upstream
            .iter()
            .filter_map(|&i| dag.node_at(i))
            .map(|n| n.id.as_str())
            .collect();
        let cache = if node.step.is_cacheable() { "" } else { " [never cache]" };
        if upstream.is_empty() {
            println!("  {} ({}){}", style(&node.id).bold(), node.step.name, style(cache).dim());
        } else {
            println!(
                "  {} ({}) <- {}{}",
                style(&node.id).bold(),
                node.step.name,
                upstream.join(", "),
                style(cache).dim()
            );
        }
    }
    for (name, value) in &dag.parameters {
        println!("  {} {} = {}", style("param").dim(), name, value);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    #[cfg(feature = "sqlite")]
    let store: Arc<dyn PersistenceBackend> = open_store(cli).await?;
    #[cfg(not(feature = "sqlite"))]
    let store: Arc<dyn PersistenceBackend> = {
        let _ = cli;
        Arc::new(InMemoryPersistence::new())
    };

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.pipeline {
        Some(pipeline) => store.list_runs(pipeline).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_runs(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Nodes: {} run, {} cached, {} failed of {}",
        style(summary.succeeded).green(),
        style(summary.cached).cyan(),
        style(summary.failed).red(),
        summary.total_nodes
    );
    if let Some(fatal) = &summary.fatal_error {
        println!("  Fatal: {}", style(fatal).red());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

async fn schedule_pipeline(cmd: &ScheduleCommand, cli: &Cli) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let schedule = config
        .schedule()
        .with_context(|| format!("Pipeline '{}' has no schedule", config.name))?;

    let mut translator = ScheduleTranslator::new();
    let handle = translator.register(schedule.clone())?;

    println!(
        "{} {} runs {} on {}",
        CLOCK,
        style(&schedule.name).bold(),
        style(&schedule.pipeline).cyan(),
        style(&schedule.cron).dim()
    );
    let mut cursor = Utc::now();
    for _ in 0..cmd.preview {
        match translator.next_fire(handle, cursor) {
            Some(next) => {
                println!("  {}", next.format("%Y-%m-%d %H:%M %Z"));
                cursor = next;
            }
            None => {
                println!("  {}", style("(no further fire times)").dim());
                break;
            }
        }
    }

    if !cmd.run {
        return Ok(());
    }

    let (orchestrator, _) = orchestrator_for(&config, cli, false, false).await?;
    orchestrator.register_pipeline(config.to_pipeline()?).await;
    orchestrator
        .add_event_handler(|event| println!("{}", format_execution_event(&event)))
        .await;

    println!("\n{} Waiting for schedule (Ctrl-C to stop)", ROCKET);
    let runner = ScheduleRunner::new(Arc::new(Mutex::new(translator)), Arc::new(orchestrator));
    runner.run(cancel_on_ctrl_c()).await;

    Ok(())
}
