//! Incident Workbench CLI
//!
//! # Commands
//!
//! - `incidents import|list`: Load and inspect incident records
//! - `embed`: Embed every stored incident
//! - `cluster run|list|show`: Cluster incidents and inspect stored runs
//! - `metrics`: Resolution-time statistics
//! - `status`: Probe the inference service
//! - `config show`: Print the effective configuration
//!
//! Exit code 1 on error, with remediation guidance on stderr.

mod ollama;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use workbench_core::cache::VectorCache;
use workbench_core::config::{Config, LogFormat};
use workbench_core::error::StorageError;
use workbench_core::inference::{HashInference, InferenceService};
use workbench_core::logging::{LogError, init_logging};
use workbench_core::metrics::{MetricsCalculator, MetricsResult};
use workbench_core::model::{Incident, RunRequest, RunResult};
use workbench_core::orchestrator::{Orchestrator, PipelineConfig, RunSink};
use workbench_core::storage::SqliteStore;

use crate::ollama::OllamaClient;

/// Incident Workbench - group related incidents and name the groups
#[derive(Parser)]
#[command(name = "iwb")]
#[command(version)]
#[command(about = "Cluster incident records into named themes")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ~/.incident-workbench/workbench.toml)
    #[arg(long, global = true, env = "WORKBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Incident records
    Incidents {
        #[command(subcommand)]
        action: IncidentCommands,
    },
    /// Embed every stored incident that lacks a current vector
    Embed(BackendArgs),
    /// Clustering runs
    Cluster {
        #[command(subcommand)]
        action: ClusterCommands,
    },
    /// Resolution-time statistics over stored incidents
    Metrics(OutputArgs),
    /// Probe the inference service
    Status,
    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum IncidentCommands {
    /// Import a JSON array of incidents; existing ids are updated
    Import { file: PathBuf },
    /// List stored incidents
    List(OutputArgs),
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Cluster all stored incidents
    Run(RunArgs),
    /// List stored runs, newest first
    List(OutputArgs),
    /// Show one run with per-cluster metrics
    Show {
        run_id: String,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Args)]
struct OutputArgs {
    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BackendArgs {
    /// Use the deterministic offline embedder instead of the HTTP service
    #[arg(long)]
    offline: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Fixed cluster count; omit to select k automatically
    #[arg(long)]
    k: Option<usize>,

    /// Linkage method (average, complete, single, ward)
    #[arg(long)]
    method: Option<String>,

    /// Distance metric (cosine, euclidean)
    #[arg(long)]
    metric: Option<String>,

    #[command(flatten)]
    backend: BackendArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(remediation) = err
                .downcast_ref::<workbench_core::Error>()
                .and_then(workbench_core::Error::remediation)
            {
                eprintln!();
                eprint!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match init_logging(&config.log_config()) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(err) => return Err(err).context("failed to initialize logging"),
    }
    debug!(db = %config.db_path().display(), "Configuration loaded");

    match cli.command {
        Commands::Incidents { action } => match action {
            IncidentCommands::Import { file } => import_incidents(&config, &file),
            IncidentCommands::List(output) => list_incidents(&config, &output),
        },
        Commands::Embed(backend) => embed(&config, &backend).await,
        Commands::Cluster { action } => match action {
            ClusterCommands::Run(args) => cluster_run(&config, args).await,
            ClusterCommands::List(output) => cluster_list(&config, &output),
            ClusterCommands::Show { run_id, output } => cluster_show(&config, &run_id, &output),
        },
        Commands::Metrics(output) => metrics(&config, &output),
        Commands::Status => status(&config).await,
        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.display().to_string();
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(config.db_path())?))
}

fn inference(config: &Config, offline: bool) -> anyhow::Result<Arc<dyn InferenceService>> {
    if offline {
        return Ok(Arc::new(HashInference::new(config.inference.embedding_dimension)));
    }
    let client = OllamaClient::new(&config.inference).map_err(workbench_core::Error::from)?;
    Ok(Arc::new(client))
}

fn orchestrator(
    config: &Config,
    store: &Arc<SqliteStore>,
    offline: bool,
) -> anyhow::Result<Orchestrator> {
    Ok(Orchestrator::new(
        inference(config, offline)?,
        Arc::clone(store) as Arc<dyn VectorCache>,
        Arc::clone(store) as Arc<dyn RunSink>,
        PipelineConfig::from_config(config)?,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn import_incidents(config: &Config, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let incidents: Vec<Incident> =
        serde_json::from_str(&text).map_err(workbench_core::Error::from)?;
    let store = open_store(config)?;
    let count = store.upsert_incidents(&incidents)?;
    println!("Imported {count} incidents ({} stored)", store.incident_count()?);
    Ok(())
}

fn list_incidents(config: &Config, output: &OutputArgs) -> anyhow::Result<()> {
    let incidents = open_store(config)?.incidents()?;
    if output.json {
        return print_json(&incidents);
    }
    for incident in &incidents {
        println!(
            "{:>8}  {:<7}  {}  {}",
            incident.id,
            incident.severity,
            incident.occurred_at.format("%Y-%m-%d"),
            incident.title
        );
    }
    println!("{} incidents", incidents.len());
    Ok(())
}

async fn embed(config: &Config, backend: &BackendArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let incidents = store.incidents()?;
    let orchestrator = orchestrator(config, &store, backend.offline)?;
    let outcome = orchestrator.embed(&incidents).await?;
    println!(
        "Embedded {} incidents in {} batches; {} already current",
        outcome.embedded, outcome.batches, outcome.reused
    );
    Ok(())
}

async fn cluster_run(config: &Config, args: RunArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let incidents = store.incidents()?;
    let orchestrator = orchestrator(config, &store, args.backend.offline)?;
    let request = RunRequest {
        n_clusters: args.k,
        method: args.method,
        metric: args.metric,
    };
    let result = orchestrator.run(&incidents, request).await?;
    if args.output.json {
        return print_json(&result);
    }
    print_run(&result);
    Ok(())
}

fn print_run(result: &RunResult) {
    println!(
        "Run {}: k={} method={} metric={} silhouette={}",
        result.run_id,
        result.resolved_k,
        result.resolved_method,
        result.resolved_metric,
        result
            .quality_score
            .map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}"))
    );
    for cluster in &result.clusters {
        println!(
            "  [{}] {} ({} incidents)",
            cluster.label,
            cluster.name,
            cluster.incident_ids.len()
        );
        if !cluster.summary.is_empty() {
            println!("      {}", cluster.summary);
        }
    }
}

fn cluster_list(config: &Config, output: &OutputArgs) -> anyhow::Result<()> {
    let runs = open_store(config)?.list_runs()?;
    if output.json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No cluster runs stored");
        return Ok(());
    }
    for run in &runs {
        println!(
            "{}  {}  k={:<3} {}/{}  {} incidents",
            run.run_id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.k,
            run.method,
            run.metric,
            run.incident_count
        );
    }
    Ok(())
}

fn cluster_show(config: &Config, run_id: &str, output: &OutputArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let run = store.run(run_id)?.ok_or_else(|| {
        workbench_core::Error::from(StorageError::NotFound(format!("cluster run {run_id}")))
    })?;
    let incidents = store.incidents_by_ids(&run.member_ids().into_iter().collect::<Vec<_>>())?;
    let per_cluster = MetricsCalculator::new().compute_per_cluster(&run, &incidents);

    if output.json {
        return print_json(&serde_json::json!({
            "run": RunResult::from(&run),
            "metrics": per_cluster,
        }));
    }
    print_run(&RunResult::from(&run));
    for (label, metrics) in &per_cluster {
        println!("  [{label}] {}", metrics_line(metrics));
    }
    Ok(())
}

fn metrics_line(m: &MetricsResult) -> String {
    let hours = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |h| format!("{h:.1}h"));
    format!(
        "total={} resolved={} mean={} p50={} p90={}",
        m.total_incidents,
        m.resolved_incidents,
        hours(m.mean_resolution_hours),
        hours(m.p50_resolution_hours),
        hours(m.p90_resolution_hours)
    )
}

fn metrics(config: &Config, output: &OutputArgs) -> anyhow::Result<()> {
    let incidents = open_store(config)?.incidents()?;
    let result = MetricsCalculator::new().compute(&incidents);
    if output.json {
        return print_json(&result);
    }
    println!("{}", metrics_line(&result));
    println!(
        "SEV1={} SEV2={} SEV3={} SEV4={} UNKNOWN={}",
        result.sev1_count,
        result.sev2_count,
        result.sev3_count,
        result.sev4_count,
        result.unknown_count
    );
    for (severity, mttr) in &result.mttr_by_severity {
        println!("  MTTR {severity}: {mttr:.1}h");
    }
    for (month, count) in &result.by_month {
        println!("  {month}: {count}");
    }
    Ok(())
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let client = OllamaClient::new(&config.inference).map_err(workbench_core::Error::from)?;
    println!("Backend: {}", client.info());
    if !client.is_available().await.map_err(workbench_core::Error::from)? {
        println!("Service: unreachable at {}", config.inference.base_url);
        return Ok(());
    }
    let version = client.version().await.map_err(workbench_core::Error::from)?;
    println!("Service: ollama {version} at {}", config.inference.base_url);
    let models = client.list_models().await.map_err(workbench_core::Error::from)?;
    for wanted in [&config.inference.embedding_model, &config.inference.generation_model] {
        let installed = models
            .iter()
            .any(|m| m == wanted || m.strip_suffix(":latest") == Some(wanted.as_str()));
        println!(
            "  {wanted}: {}",
            if installed { "installed" } else { "missing (ollama pull)" }
        );
    }
    Ok(())
}
