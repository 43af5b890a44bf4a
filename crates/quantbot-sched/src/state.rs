//! Per-job runtime state, keyed by job id.
//!
//! In-memory only: a process restart starts every job back at `Idle`
//! while the persisted definitions survive.

use std::collections::HashMap;

use quantbot_types::JobRuntimeState;

/// Lazily-populated map of job id to runtime state.
#[derive(Debug, Default)]
pub struct JobStateTracker {
    states: HashMap<String, JobRuntimeState>,
}

impl JobStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current runtime state of a job, defaulting for unseen ids.
    pub fn get(&self, id: &str) -> JobRuntimeState {
        self.states.get(id).cloned().unwrap_or_default()
    }

    /// Mutable runtime state of a job, created with defaults on first
    /// reference.
    pub fn entry(&mut self, id: &str) -> &mut JobRuntimeState {
        self.states.entry(id.to_string()).or_default()
    }

    /// Discard a job's runtime state (after definition removal).
    pub fn remove(&mut self, id: &str) {
        self.states.remove(id);
    }
}
