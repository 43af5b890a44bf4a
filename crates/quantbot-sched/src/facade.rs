//! Validated public boundary over the scheduler.
//!
//! Every caller (CLI, UI process, tests) goes through this facade:
//! mutations are validated before they reach the job list, and reads
//! come back as a self-contained snapshot.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use quantbot_types::{
    ExecutionResult, JobDefinition, JobRuntimeState, JobSnapshot, SchedulerSnapshot,
};

use crate::SchedulerError;
use crate::scheduler::JobScheduler;

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid id pattern"));

/// How far ahead the next-run estimator searches for fixed-time jobs.
const NEXT_RUN_HORIZON_DAYS: i64 = 8;

/// Validated CRUD and snapshot API over a [`JobScheduler`].
pub struct SchedulerFacade {
    scheduler: Arc<JobScheduler>,
}

impl SchedulerFacade {
    pub fn new(scheduler: Arc<JobScheduler>) -> Self {
        Self { scheduler }
    }

    /// Read-only projection of definitions plus runtime state.
    pub async fn get_snapshot(&self) -> SchedulerSnapshot {
        self.snapshot_at(Utc::now()).await
    }

    /// Snapshot at an explicit instant.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> SchedulerSnapshot {
        let level = self.scheduler.level();
        let mut jobs = Vec::new();
        for job in self.scheduler.jobs().await {
            let rt = self.scheduler.runtime(&job.id).await;
            jobs.push(JobSnapshot {
                next_run_at: estimate_next_run(&job, &rt, now),
                id: job.id.clone(),
                enabled: job.enabled,
                command: job.command.clone(),
                required_level: job.required_level,
                run_always: job.run_always,
                schedule: job.schedule(),
                state: rt.state,
                last_run_at: rt.last_run_at,
                last_result: rt.last_result,
            });
        }
        SchedulerSnapshot {
            scheduler_level: level,
            can_edit: level.can_edit(),
            jobs,
            generated_at: now,
        }
    }

    /// Validate and upsert a job, then persist the document.
    pub async fn add_job(&self, job: JobDefinition) -> Result<(), SchedulerError> {
        validate_job(&job)?;
        self.scheduler.upsert_job(job).await
    }

    /// Remove a job by id; returns whether a removal occurred.
    pub async fn remove_job(&self, id: &str) -> Result<bool, SchedulerError> {
        self.scheduler.remove_job(id).await
    }

    /// Run a job immediately, bypassing its schedule.
    pub async fn run_job_now(&self, id: &str) -> Result<ExecutionResult, SchedulerError> {
        self.scheduler.run_now(id).await
    }
}

/// Check a job definition against the persisted-schema constraints.
pub fn validate_job(job: &JobDefinition) -> Result<(), SchedulerError> {
    if !ID_PATTERN.is_match(&job.id) {
        return Err(SchedulerError::Validation(format!(
            "invalid job id {:?}: expected 1-64 letters, digits, '_' or '-'",
            job.id
        )));
    }
    if job.command.trim().is_empty() {
        return Err(SchedulerError::Validation(
            "job command must not be empty".to_string(),
        ));
    }
    if let Some(weekday) = job.weekday {
        if weekday > 6 {
            return Err(SchedulerError::Validation(format!(
                "weekday {weekday} out of range 0-6"
            )));
        }
    }
    if let Some(hour) = job.hour {
        if hour > 23 {
            return Err(SchedulerError::Validation(format!(
                "hour {hour} out of range 0-23"
            )));
        }
    }
    if let Some(minute) = job.minute {
        if minute > 59 {
            return Err(SchedulerError::Validation(format!(
                "minute {minute} out of range 0-59"
            )));
        }
    }
    Ok(())
}

/// Estimated next fire time for the snapshot.
///
/// Fixed-time jobs: nearest future minute matching the schedule
/// fields, scanning up to eight days out. Continuous jobs: whatever
/// the tracker last computed, if anything.
pub fn estimate_next_run(
    job: &JobDefinition,
    rt: &JobRuntimeState,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if job.is_continuous() {
        return if job.run_always { rt.next_run_at } else { None };
    }

    let mut candidate = now
        .with_second(0)?
        .with_nanosecond(0)?
        .checked_add_signed(Duration::minutes(1))?;
    let horizon = now.checked_add_signed(Duration::days(NEXT_RUN_HORIZON_DAYS))?;
    while candidate <= horizon {
        if job.schedule_matches(candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}
