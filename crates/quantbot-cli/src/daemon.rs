//! Headless daemon loop: ticks the scheduler until told to stop.
//!
//! The loop outlives any UI process and never exits because of a job
//! or tick failure; only shutdown signals (or a fatal initialization
//! error before the loop starts) terminate it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use quantbot_sched::JobScheduler;

/// Set up rotating daily file logs alongside stderr output.
pub fn init_daemon_logging(log_dir: Option<PathBuf>) -> anyhow::Result<WorkerGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => quantbot_config::config_dir()?.join("logs"),
    };
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::daily(&log_dir, "quantbot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .with_ansi(false)
        .init();

    Ok(guard)
}

/// Tick `run_pending()` on a fixed interval until a shutdown signal.
pub async fn run(scheduler: Arc<JobScheduler>, poll_interval: Duration) -> anyhow::Result<()> {
    info!(
        interval_secs = poll_interval.as_secs(),
        "Scheduler daemon started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let outcomes = scheduler.run_pending().await;
        for outcome in &outcomes {
            if outcome.result.ok {
                info!(job_id = %outcome.job_id, "Job completed");
            } else {
                // Failures are data; the loop itself keeps going.
                warn!(
                    job_id = %outcome.job_id,
                    return_code = outcome.result.return_code,
                    error = ?outcome.result.error,
                    "Job failed"
                );
            }
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping daemon");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
