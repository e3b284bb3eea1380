//! loadfleet: multi-region load-test run coordinator
//!
//! Launches containerized load generators across regions through an
//! orchestration platform endpoint, polls them to completion, and reports
//! the run verdict.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadfleet::config::{RunConfig, DEFAULT_DEADLINE_SECS, DEFAULT_POLL_INTERVAL_SECS};
use loadfleet::coordinator::Coordinator;
use loadfleet::platform::HttpPlatform;
use loadfleet::status::RunStatus;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "loadfleet")]
#[command(about = "Distributed load-test coordination across regions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a load-test run and wait for its verdict
    Run {
        /// Comma-separated target regions
        #[arg(short, long)]
        regions: String,

        /// Container image reference for the load generator
        #[arg(short, long)]
        image: String,

        /// Number of tasks to launch per region
        #[arg(short = 'c', long, default_value = "1")]
        tasks_per_region: u32,

        /// Orchestration platform endpoint
        #[arg(long, env = "LOADFLEET_ENDPOINT")]
        endpoint: String,

        /// Run identifier (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Seconds between completion poll cycles
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval: u64,

        /// Overall run deadline in seconds
        #[arg(long, default_value_t = DEFAULT_DEADLINE_SECS)]
        deadline: u64,

        /// Output JSON file for the run report
        #[arg(short, long)]
        output: Option<String>,

        /// Validate configuration and print the launch plan without
        /// contacting the platform
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            regions,
            image,
            tasks_per_region,
            endpoint,
            run_id,
            poll_interval,
            deadline,
            output,
            dry_run,
        } => {
            let regions: Vec<String> = regions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            let run_id = run_id.unwrap_or_else(|| Uuid::now_v7().to_string());

            let config = RunConfig {
                run_id,
                image,
                regions,
                tasks_per_region,
                poll_interval: Duration::from_secs(poll_interval),
                deadline: Duration::from_secs(deadline),
            };

            if dry_run {
                config.validate()?;
                print_plan(&config, &endpoint);
                return Ok(());
            }

            let platform = Arc::new(
                HttpPlatform::new(&endpoint).context("Failed to build platform client")?,
            );

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received, aborting run");
                        cancel.cancel();
                    }
                });
            }

            info!(
                run_id = %config.run_id,
                endpoint = %endpoint,
                "starting coordinator"
            );

            let coordinator = Coordinator::new(platform);
            let report = coordinator.start(&config, &cancel).await?;

            println!("\n{report}");

            if let Some(path) = output {
                report.write_json(Path::new(&path))?;
            }

            if report.status != RunStatus::Succeeded {
                anyhow::bail!(
                    "run {} finished with status {}",
                    report.run_id,
                    report.status
                );
            }
        }
    }

    Ok(())
}

/// Print what a run would do, without contacting the platform
fn print_plan(config: &RunConfig, endpoint: &str) {
    println!("\n=== DRY RUN ===\n");
    println!("This would launch the following load test:\n");
    println!("  Run ID:        {}", config.run_id);
    println!("  Endpoint:      {}", endpoint);
    println!("  Image:         {}", config.image);
    println!("  Tasks/region:  {}", config.tasks_per_region);
    println!();
    println!("  Regions:");
    for region in &config.regions {
        println!("    - {}", region);
    }
    println!();
    println!(
        "  Total tasks:   {} across {} regions",
        config.total_tasks(),
        config.regions.len()
    );
    println!("  Poll interval: {}s", config.poll_interval.as_secs());
    println!("  Deadline:      {}s", config.deadline.as_secs());
    println!();
    println!("To run for real, remove the --dry-run flag.");
}
