//! dashdeep CLI - Main entry point

mod cli;
mod jobs;

use clap::{Parser, Subcommand};
use dashdeep_foundation::DashConfig;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dashdeep - run experiment jobs in isolated worker processes
#[derive(Parser, Debug)]
#[command(name = "dashdeep")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job, optionally several times, and monitor it until done
    Run(cli::RunArgs),
    /// List built-in jobs
    Jobs,
    /// Worker process entry point (spawned by the pool)
    #[command(hide = true)]
    Worker,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let is_worker = matches!(args.command, Command::Worker);

    // Logs always go to stderr; a worker's stdout is the reply channel
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(!is_worker)
                .with_writer(std::io::stderr),
        )
        .init();

    match args.command {
        Command::Worker => {
            dashdeep_task::run_stdio_worker(&jobs::builtin())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Jobs => {
            list_jobs_cmd();
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run_args) => {
            let config = DashConfig::load().unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config: {}", e);
                DashConfig::default()
            });

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let success = runtime.block_on(cli::run(run_args, config, args.debug))?;

            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// List built-in jobs
fn list_jobs_cmd() {
    let jobs = jobs::builtin();
    let width = jobs.names().map(str::len).max().unwrap_or(0);

    println!("\nBuilt-in jobs\n");
    for (name, description) in jobs.describe() {
        println!("  {:<width$}  {}", name, description, width = width);
    }
    println!("\nUse 'dashdeep run <JOB> --arg key=value' to run one.\n");
}
