//! hive - プランを読み込み、グループを処理しきるまで回す CLI
//!
//! ```text
//! hive run --plan plan.json [--config hive.toml] [--group release] [--fail Deploy]
//! hive check --plan plan.json
//! ```

mod plan_file;
mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use hive_core::app::GroupStatus;
use hive_core::{EngineBuilder, EngineConfig, GroupProcessor, ProcessorReport};

use crate::plan_file::JsonPlanGenerator;
use crate::simulate::SimulatedExecutor;

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "Decentralized job coordination: import a plan and work it off", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a plan and run its group until nothing is left to do
    Run {
        /// JSON plan file
        #[arg(long)]
        plan: PathBuf,

        /// TOML engine config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run the plan under this group instead of its own
        #[arg(long)]
        group: Option<String>,

        /// Titles whose simulated execution always fails (repeatable)
        #[arg(long = "fail")]
        fail: Vec<String>,

        /// Simulated work per job, in milliseconds
        #[arg(long, default_value_t = 20)]
        work_ms: u64,
    },

    /// Validate a plan: duplicate or unknown keys and dependency cycles
    Check {
        /// JSON plan file
        #[arg(long)]
        plan: PathBuf,
    },
}

#[derive(Serialize)]
struct RunSummary {
    report: ProcessorReport,
    status: GroupStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            plan,
            config,
            group,
            fail,
            work_ms,
        } => run(plan, config, group, fail, work_ms).await,
        Commands::Check { plan } => check(plan).await,
    }
}

async fn run(
    plan_path: PathBuf,
    config_path: Option<PathBuf>,
    group: Option<String>,
    fail: Vec<String>,
    work_ms: u64,
) -> Result<()> {
    let config = EngineConfig::load(config_path.as_deref())
        .context("loading engine config")?;
    let engine = EngineBuilder::new()
        .config(config)
        .build()
        .context("building engine")?;

    let source = read_plan(&plan_path)?;
    let generator = JsonPlanGenerator::new().with_group(group);
    let import = engine
        .import_plan_from(&generator, &source)
        .await
        .with_context(|| format!("importing {}", plan_path.display()))?;
    let Some(group_id) = import.jobs.first().map(|job| job.group_id.clone()) else {
        bail!("{} contains no jobs", plan_path.display());
    };
    info!(
        group_id = %group_id,
        jobs = import.jobs.len(),
        edges = import.dependency_edges.len(),
        "plan imported"
    );

    let executor = Arc::new(SimulatedExecutor::new(
        Duration::from_millis(work_ms),
        fail,
    ));
    let report = GroupProcessor::new(engine.clone(), group_id.as_str(), executor)
        .run_until_idle()
        .await
        .context("processing group")?;
    let status = engine.group_status(&group_id).await?;

    let summary = RunSummary { report, status };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn check(plan_path: PathBuf) -> Result<()> {
    let source = read_plan(&plan_path)?;
    let plan = plan_file::parse(&source)?;
    plan.validate()
        .with_context(|| format!("{} is not a valid plan", plan_path.display()))?;

    // Importing into a scratch engine is what finds cycles.
    let engine = EngineBuilder::new().build()?;
    let import = engine
        .create_jobs_from_plan(plan)
        .await
        .with_context(|| format!("{} cannot be imported", plan_path.display()))?;

    println!(
        "{}: ok ({} jobs, {} dependencies)",
        plan_path.display(),
        import.jobs.len(),
        import.dependency_edges.len()
    );
    Ok(())
}

fn read_plan(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
