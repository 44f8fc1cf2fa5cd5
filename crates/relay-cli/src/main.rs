use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use relay_core::app::{EngineBuilder, JobParams};
use relay_core::config::EngineConfig;
use relay_core::domain::{ExecutionType, InstanceId, JobState, Workflow};

/// Run a workflow definition on an in-process engine and print the job status.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Args {
    /// Path to the workflow definition (JSON)
    workflow: PathBuf,

    /// Engine config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of workers
    #[arg(long)]
    workers: Option<usize>,

    /// Keep files on disk under this directory
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Job inputs as a JSON object
    #[arg(long)]
    inputs: Option<String>,

    /// Instance id that binds INSTANCE-scoped data
    #[arg(long)]
    instance_id: Option<InstanceId>,

    /// AUTOMATION, EMBEDDED or PLATFORM
    #[arg(long)]
    execution_type: Option<ExecutionType>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn job_params(&self, inputs: Map<String, Value>) -> JobParams {
        JobParams {
            instance_id: self.instance_id,
            inputs,
            ..JobParams::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(root) = args.storage_root.clone() {
        config.storage_root = Some(root);
    }
    if args.execution_type.is_some() {
        config.execution_type = args.execution_type;
    }

    let workflow: Workflow = {
        let raw = std::fs::read_to_string(&args.workflow)
            .with_context(|| format!("reading workflow {}", args.workflow.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing workflow {}", args.workflow.display()))?
    };
    let inputs: Map<String, Value> = match &args.inputs {
        Some(raw) => serde_json::from_str(raw).context("--inputs must be a JSON object")?,
        None => Map::new(),
    };

    let engine = EngineBuilder::new()
        .with_builtin_handlers()?
        .with_config(config)
        .build()?;
    let handle = engine.start();

    let outcome = async {
        let workflow_id = engine.coordinator().register_workflow(workflow).await?;
        let job_id = engine
            .start_job(workflow_id, args.job_params(inputs))
            .await?;
        tracing::info!(%job_id, "waiting for job");
        tokio::time::timeout(
            Duration::from_secs(args.timeout_secs),
            engine.coordinator().await_terminal(job_id),
        )
        .await
        .with_context(|| format!("job {job_id} did not finish within {}s", args.timeout_secs))??;
        let status = engine.coordinator().forget_job(job_id).await?;
        Ok::<_, anyhow::Error>(status)
    }
    .await;

    handle.shutdown().await;

    let status = outcome?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if status.state != JobState::Completed {
        bail!("job {} ended as {:?}", status.job_id, status.state);
    }
    Ok(())
}
