//! `run` command: schedule jobs and monitor them until every task is done

use crate::jobs;
use anyhow::{bail, Context};
use dashdeep_foundation::DashConfig;
use dashdeep_task::{
    render_table, PoolConfig, TaskManager, TaskManagerConfig, TaskRecord, WorkerCommand,
};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Job to run (see `dashdeep jobs`)
    pub job: String,

    /// Job argument; the value is parsed as JSON when possible
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE")]
    pub arg: Vec<String>,

    /// All job arguments as a JSON object (`--arg` entries override keys)
    #[arg(long = "args", value_name = "JSON")]
    pub args_json: Option<String>,

    /// Number of tasks to schedule
    #[arg(short = 'n', long, default_value_t = 1)]
    pub repeat: usize,

    /// Maximum concurrent worker processes
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Tasks a worker runs before it is replaced
    #[arg(long)]
    pub tasks_per_worker: Option<usize>,

    /// Print the final records as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

/// Run the command. Returns whether every task finished successfully.
pub async fn run(args: RunArgs, config: DashConfig, debug: bool) -> anyhow::Result<bool> {
    let jobs = jobs::builtin();
    if !jobs.contains(&args.job) {
        bail!(
            "Unknown job '{}'. Use 'dashdeep jobs' to list jobs.",
            args.job
        );
    }
    let job_args = parse_job_args(args.args_json.as_deref(), &args.arg)?;

    let mut worker = WorkerCommand::current_exe()?.arg("worker");
    if debug {
        worker = worker.arg("--debug");
    }

    let mut pool = PoolConfig::from_settings(&config.pool, worker);
    if let Some(workers) = args.workers {
        pool = pool.with_max_workers(workers);
    }
    if let Some(tasks) = args.tasks_per_worker {
        pool = pool.with_tasks_per_worker(tasks);
    }

    let manager = TaskManager::new(TaskManagerConfig::new(pool).with_jobs(jobs))?;

    // Shut down on every path out of the monitor, errors included
    let outcome = monitor(&manager, &args, job_args, config.monitor.poll_interval()).await;
    let report = manager.shutdown().await;

    let records = manager.records();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_table(&records));
    }

    let stats = manager.stats();
    info!(
        finished = stats.finished,
        failed = stats.failed,
        cancelled = stats.cancelled,
        workers = report.workers_spawned,
        "Run complete"
    );

    let interrupted = outcome?;
    Ok(!interrupted && report.is_clean() && stats.failed == 0 && stats.cancelled == 0)
}

/// Schedule the tasks and print the projection whenever it changes.
/// Returns `true` if interrupted by a signal.
async fn monitor(
    manager: &TaskManager,
    args: &RunArgs,
    job_args: Value,
    poll_interval: Duration,
) -> anyhow::Result<bool> {
    for _ in 0..args.repeat {
        manager.schedule(args.job.as_str(), job_args.clone())?;
    }

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let mut ticker = tokio::time::interval(poll_interval);
    let mut last: Vec<TaskRecord> = Vec::new();

    loop {
        tokio::select! {
            _ = &mut signal => {
                warn!("Interrupted, shutting down");
                return Ok(true);
            }
            _ = ticker.tick() => {
                let records = manager.records();
                if !args.json && records != last {
                    println!("{}", render_table(&records));
                    last = records;
                }

                if manager.stats().all_terminal() {
                    return Ok(false);
                }
            }
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Merge `--args` and `--arg` entries into one JSON object
fn parse_job_args(json: Option<&str>, pairs: &[String]) -> anyhow::Result<Value> {
    let mut args = match json {
        Some(text) => match serde_json::from_str::<Value>(text).context("--args is not valid JSON")? {
            Value::Object(map) => map,
            other => bail!("--args must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("--arg expects KEY=VALUE, got '{}'", pair);
        };
        // Bare words stay strings: `--arg path=/tmp/x`
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        args.insert(key.trim().to_string(), value);
    }

    Ok(Value::Object(args))
}
