//! Schedule evaluation: decides whether a job is due right now.
//!
//! Pure functions of (definition, runtime state, now); no clocks or
//! side effects, so every edge case is directly testable.

use chrono::{DateTime, Utc};

use quantbot_types::{JobDefinition, JobRuntimeState, JobState};

/// Whether `job` should run at `now`.
///
/// Fixed-time jobs (any schedule field set) run when every set field
/// matches `now`, at most once per matching calendar slot: a run
/// started earlier the same day in the same slot blocks a re-fire.
/// Continuous jobs run only with `run_always` set, throttled by
/// `next_run_at`. A job with no schedule and no `run_always` never
/// runs.
pub fn should_run(job: &JobDefinition, rt: &JobRuntimeState, now: DateTime<Utc>) -> bool {
    if !job.enabled || rt.state == JobState::Running {
        return false;
    }

    if job.is_continuous() {
        if !job.run_always {
            return false;
        }
        return rt.next_run_at.map_or(true, |next| now >= next);
    }

    if !job.schedule_matches(now) {
        return false;
    }

    // Same-day dedup guard: already fired in this slot today.
    if let Some(last) = rt.last_run_at {
        if last.date_naive() == now.date_naive() && job.schedule_matches(last) {
            return false;
        }
    }

    true
}
