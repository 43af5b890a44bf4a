mod daemon;
mod jobs;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use quantbot_config::JobStore;
use quantbot_sched::{
    CapabilityProvider, FixedCapability, JobScheduler, ProcessExecutor, SchedulerFacade,
    StoredCapability,
};
use quantbot_types::CapabilityLevel;

#[derive(Parser)]
#[command(name = "quantbot", about = "Trading-bot job scheduler")]
struct Cli {
    /// Path to the scheduler document (default: ~/.quantbot/scheduler.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Edition override for capability gating (default: stored level)
    #[arg(long, global = true)]
    edition: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the headless scheduler daemon
    Daemon {
        /// Poll interval between ticks, in seconds
        #[arg(long, default_value_t = 1)]
        interval: u64,

        /// Directory for rotating log files (default: ~/.quantbot/logs)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Working directory for job commands
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Evaluate every job once and print the outcomes
    Tick {
        /// Working directory for job commands
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        command: jobs::JobsCommand,
    },
}

/// Build the per-process scheduler instance from CLI options.
fn build_scheduler(
    config: Option<PathBuf>,
    edition: Option<&str>,
    working_dir: Option<PathBuf>,
) -> anyhow::Result<Arc<JobScheduler>> {
    let store = Arc::new(match config {
        Some(path) => JobStore::open(path),
        None => JobStore::open_default()?,
    });
    let provider: Arc<dyn CapabilityProvider> = match edition {
        Some(edition) => Arc::new(FixedCapability(CapabilityLevel::from_edition(edition))),
        None => Arc::new(StoredCapability::new(store.clone())),
    };
    let executor = Arc::new(ProcessExecutor::new(working_dir));
    Ok(Arc::new(JobScheduler::new(store, provider, executor)))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            interval,
            log_dir,
            working_dir,
        } => {
            // Rotating file logs plus stderr; the guard must outlive
            // the loop so buffered lines get flushed on shutdown.
            let _guard = daemon::init_daemon_logging(log_dir)?;
            let scheduler = build_scheduler(cli.config, cli.edition.as_deref(), working_dir)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                scheduler.load().await?;
                daemon::run(scheduler, std::time::Duration::from_secs(interval.max(1))).await
            })?;
        }
        Commands::Tick { working_dir } => {
            init_logging();
            let scheduler = build_scheduler(cli.config, cli.edition.as_deref(), working_dir)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                scheduler.load().await?;
                let outcomes = scheduler.run_pending().await;
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
                anyhow::Ok(())
            })?;
        }
        Commands::Jobs { command } => {
            init_logging();
            let scheduler = build_scheduler(cli.config, cli.edition.as_deref(), None)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                scheduler.load().await?;
                let facade = SchedulerFacade::new(scheduler);
                jobs::run(&facade, command).await
            })?;
        }
    }

    Ok(())
}
