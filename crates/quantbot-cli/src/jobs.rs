//! `jobs` subcommands: list, add, remove, run.

use clap::Subcommand;
use tracing::warn;

use quantbot_sched::SchedulerFacade;
use quantbot_types::JobDefinition;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Print the scheduler snapshot
    List {
        /// Emit the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add or replace a job
    Add {
        /// Unique job id (letters, digits, '_' or '-')
        #[arg(long)]
        id: String,

        /// Command line to execute
        #[arg(long)]
        command: String,

        /// Weekday to run on (0 = Monday .. 6 = Sunday)
        #[arg(long)]
        weekday: Option<u8>,

        /// Hour to run at (0-23)
        #[arg(long)]
        hour: Option<u8>,

        /// Minute to run at (0-59)
        #[arg(long)]
        minute: Option<u8>,

        /// Re-run continuously at a fixed minimum interval
        #[arg(long)]
        run_always: bool,

        /// Minimum capability rank required to run this job
        #[arg(long)]
        required_level: Option<u8>,

        /// Create the job disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a job by id
    Remove { id: String },
    /// Run a job immediately, ignoring its schedule
    Run { id: String },
}

pub async fn run(facade: &SchedulerFacade, command: JobsCommand) -> anyhow::Result<()> {
    match command {
        JobsCommand::List { json } => {
            let snapshot = facade.get_snapshot().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }
            println!(
                "level: {} (can_edit: {})",
                snapshot.scheduler_level, snapshot.can_edit
            );
            if snapshot.jobs.is_empty() {
                println!("no jobs configured");
                return Ok(());
            }
            for job in &snapshot.jobs {
                let schedule = if job.run_always {
                    "always".to_string()
                } else {
                    format!(
                        "w={} h={} m={}",
                        fmt_field(job.schedule.weekday),
                        fmt_field(job.schedule.hour),
                        fmt_field(job.schedule.minute)
                    )
                };
                println!(
                    "  {}  enabled={}  {}  state={:?}  last_run={}  next_run={}",
                    job.id,
                    job.enabled,
                    schedule,
                    job.state,
                    job.last_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    job.next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        JobsCommand::Add {
            id,
            command,
            weekday,
            hour,
            minute,
            run_always,
            required_level,
            disabled,
        } => {
            if !facade.get_snapshot().await.can_edit {
                warn!("Current capability level does not permit editing; saving anyway");
            }
            facade
                .add_job(JobDefinition {
                    id: id.clone(),
                    enabled: !disabled,
                    command,
                    weekday,
                    hour,
                    minute,
                    run_always,
                    required_level,
                })
                .await?;
            println!("job {id} saved");
        }
        JobsCommand::Remove { id } => {
            if facade.remove_job(&id).await? {
                println!("job {id} removed");
            } else {
                println!("job {id} not found");
            }
        }
        JobsCommand::Run { id } => {
            let result = facade.run_job_now(&id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn fmt_field(field: Option<u8>) -> String {
    field.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string())
}
