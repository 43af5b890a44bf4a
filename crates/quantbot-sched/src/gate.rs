//! Capability gating: which jobs may run at the current edition tier.

use std::sync::Arc;

use quantbot_config::JobStore;
use quantbot_types::{CapabilityLevel, JobDefinition};

/// Source of the caller's current capability level.
///
/// The scheduler treats this as an opaque lookup; editions, license
/// checks, and whatever else decides the tier live behind this trait.
pub trait CapabilityProvider: Send + Sync {
    fn current_level(&self) -> CapabilityLevel;
}

/// A provider pinned to one level. Used by tests and CLI overrides.
pub struct FixedCapability(pub CapabilityLevel);

impl CapabilityProvider for FixedCapability {
    fn current_level(&self) -> CapabilityLevel {
        self.0
    }
}

/// Provider backed by the `scheduler_level` stored in the document.
pub struct StoredCapability {
    store: Arc<JobStore>,
}

impl StoredCapability {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

impl CapabilityProvider for StoredCapability {
    fn current_level(&self) -> CapabilityLevel {
        self.store
            .load()
            .map(|c| c.level())
            .unwrap_or(CapabilityLevel::Free)
    }
}

/// Filters the job list down to what the current level permits.
pub struct CapabilityGate {
    provider: Arc<dyn CapabilityProvider>,
}

impl CapabilityGate {
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { provider }
    }

    /// The current capability level.
    pub fn level(&self) -> CapabilityLevel {
        self.provider.current_level()
    }

    /// Whether a job's required level is within the current level.
    pub fn allow(&self, job: &JobDefinition) -> bool {
        self.allow_at(job, self.level())
    }

    fn allow_at(&self, job: &JobDefinition, level: CapabilityLevel) -> bool {
        job.required_level.map_or(true, |r| r <= level.rank())
    }

    /// Maximum number of jobs eligible in one tick. Bounded at every
    /// tier so even the highest edition cannot queue unbounded work.
    pub fn limit(&self) -> usize {
        self.level().job_limit()
    }

    /// The eligible subset of `jobs`: allowed by level, truncated to
    /// the per-tick limit.
    pub fn eligible<'a>(&self, jobs: &'a [JobDefinition]) -> Vec<&'a JobDefinition> {
        let level = self.level();
        let mut eligible: Vec<&JobDefinition> = jobs
            .iter()
            .filter(|job| self.allow_at(job, level))
            .collect();
        eligible.truncate(level.job_limit());
        eligible
    }
}
