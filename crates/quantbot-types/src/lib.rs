//! quantbot-types: Shared data model for the job scheduler.
//!
//! Job definitions, capability levels, execution results, and the
//! persisted scheduler document live here so that the config store,
//! the scheduling engine, and the CLI all agree on one schema.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Capability Types ────────────────────

/// Ordered capability tier gating which jobs may be configured or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityLevel {
    Free,
    Basic,
    Pro,
    Expert,
    Master,
}

impl CapabilityLevel {
    /// Resolve a persisted numeric rank. Unknown values resolve to `Free`.
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Free,
            1 => Self::Basic,
            2 => Self::Pro,
            3 => Self::Expert,
            4 => Self::Master,
            _ => Self::Free,
        }
    }

    /// Map an external edition identifier to a level.
    /// Unknown identifiers resolve to `Free`.
    pub fn from_edition(edition: &str) -> Self {
        match edition.trim().to_ascii_lowercase().as_str() {
            "free" | "demo" => Self::Free,
            "basic" | "starter" => Self::Basic,
            "pro" => Self::Pro,
            "expert" => Self::Expert,
            "master" | "unlimited" => Self::Master,
            _ => Self::Free,
        }
    }

    /// Numeric rank used in the persisted document.
    pub fn rank(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Basic => 1,
            Self::Pro => 2,
            Self::Expert => 3,
            Self::Master => 4,
        }
    }

    /// Maximum number of jobs eligible in a single tick at this level.
    pub fn job_limit(self) -> usize {
        match self {
            Self::Free => 0,
            Self::Basic | Self::Pro => 1,
            Self::Expert | Self::Master => 10,
        }
    }

    /// Whether the job list may be edited at this level.
    pub fn can_edit(self) -> bool {
        matches!(self, Self::Master)
    }
}

impl std::fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Expert => "expert",
            Self::Master => "master",
        };
        f.write_str(name)
    }
}

// ──────────────────── Job Definition ────────────────────

/// A scheduled job as it appears in the persisted document.
///
/// The schedule fields are a calendar match, not a cron expression:
/// each `Some` field must equal the corresponding field of the current
/// time, each `None` field matches anything. Weekday 0 is Monday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job ID.
    pub id: String,
    /// Whether this job is considered by the scheduler.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// External command line to execute. Opaque to the scheduler.
    pub command: String,
    /// Weekday to run on (0 = Monday .. 6 = Sunday).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u8>,
    /// Hour to run at (0-23).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
    /// Minute to run at (0-59).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u8>,
    /// Run repeatedly at a fixed minimum interval instead of a
    /// calendar slot. Only meaningful when no schedule field is set.
    #[serde(default)]
    pub run_always: bool,
    /// Minimum capability rank required to run this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_level: Option<u8>,
}

fn default_enabled() -> bool {
    true
}

impl JobDefinition {
    /// Whether this job has no fixed schedule fields at all.
    pub fn is_continuous(&self) -> bool {
        self.weekday.is_none() && self.hour.is_none() && self.minute.is_none()
    }

    /// Whether every set schedule field matches the given instant.
    pub fn schedule_matches(&self, at: DateTime<Utc>) -> bool {
        let weekday = at.weekday().num_days_from_monday() as u8;
        self.weekday.map_or(true, |w| w == weekday)
            && self.hour.map_or(true, |h| h == at.hour() as u8)
            && self.minute.map_or(true, |m| m == at.minute() as u8)
    }

    /// Schedule fields as a standalone struct (snapshot projection).
    pub fn schedule(&self) -> ScheduleFields {
        ScheduleFields {
            weekday: self.weekday,
            hour: self.hour,
            minute: self.minute,
        }
    }
}

/// The weekday/hour/minute triple of a job, as exposed in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u8>,
}

// ──────────────────── Execution Results ────────────────────

/// Machine-readable failure classification for a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoCommand,
    Timeout,
    ExecutionError,
}

/// Failure detail attached to an [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff the command completed with exit code 0.
    pub ok: bool,
    /// Process exit code; -1 when the process never completed.
    pub return_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ExecutionResult {
    /// Result for a command that ran to completion.
    pub fn completed(return_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            ok: return_code == 0,
            return_code,
            stdout,
            stderr,
            error: None,
        }
    }

    /// Result for a run that failed before or instead of completing.
    pub fn failed(code: ErrorCode, message: Option<String>) -> Self {
        Self {
            ok: false,
            return_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(ErrorInfo { code, message }),
        }
    }

    /// The error code, if this result carries one.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

// ──────────────────── Runtime State ────────────────────

/// Job lifecycle state within a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

/// In-memory runtime state of a job. Never persisted; a process
/// restart resets it to defaults while the definition survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRuntimeState {
    pub state: JobState,
    /// Start time of the most recent execution. Set before the
    /// process is spawned so the dedup guard holds across crashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ExecutionResult>,
    /// Earliest next fire time; only populated for run_always jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

// ──────────────────── Persisted Document ────────────────────

/// Top-level persisted scheduler document.
///
/// Top-level keys this subsystem does not understand are kept in
/// `extra` and written back unchanged on save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Persisted capability rank, if one has been stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_level: Option<u8>,
    /// Unknown top-level keys, preserved across load/save.
    #[serde(flatten)]
    pub extra: toml::Table,
    /// The job list.
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl SchedulerConfig {
    /// The stored capability level, defaulting to `Free`.
    pub fn level(&self) -> CapabilityLevel {
        self.scheduler_level
            .map(CapabilityLevel::from_rank)
            .unwrap_or(CapabilityLevel::Free)
    }

    /// Find a job by id.
    pub fn job(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

// ──────────────────── Snapshot Types ────────────────────

/// One job in the observer snapshot: definition merged with runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub enabled: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_level: Option<u8>,
    pub run_always: bool,
    pub schedule: ScheduleFields,
    /// Estimated next fire time, when one can be computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ExecutionResult>,
}

/// Read-only projection of the whole scheduler for external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub scheduler_level: CapabilityLevel,
    pub can_edit: bool,
    pub jobs: Vec<JobSnapshot>,
    pub generated_at: DateTime<Utc>,
}
