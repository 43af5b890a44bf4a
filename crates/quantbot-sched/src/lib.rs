//! quantbot-sched: Background job scheduling engine.
//!
//! Composes the capability gate, schedule evaluator, process executor,
//! and per-job runtime state into a single-instance scheduler with a
//! validated facade on top. Job business logic stays outside; the
//! engine only decides when to run an opaque command and records what
//! happened.

pub mod evaluate;
pub mod executor;
pub mod facade;
pub mod gate;
pub mod scheduler;
pub mod state;

use thiserror::Error;

pub use executor::{JobExecutor, ProcessExecutor};
pub use facade::SchedulerFacade;
pub use gate::{CapabilityGate, CapabilityProvider, FixedCapability, StoredCapability};
pub use scheduler::{JobScheduler, TickOutcome};

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A mutation was rejected before touching the job list.
    #[error("validation error: {0}")]
    Validation(String),
    /// The referenced job does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),
    /// The job is mid-execution and cannot be started again.
    #[error("job {0} is already running")]
    AlreadyRunning(String),
    /// A persisted edit could not be written.
    #[error("persistence error: {0}")]
    Persistence(#[from] quantbot_config::ConfigError),
}
