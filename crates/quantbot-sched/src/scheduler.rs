//! The scheduler orchestrator: one tick evaluates every job once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use quantbot_config::JobStore;
use quantbot_types::{CapabilityLevel, ExecutionResult, JobDefinition, JobRuntimeState, JobState};

use crate::SchedulerError;
use crate::evaluate::should_run;
use crate::executor::JobExecutor;
use crate::gate::{CapabilityGate, CapabilityProvider};
use crate::state::JobStateTracker;

/// Re-fire interval for `run_always` jobs.
pub const RUN_ALWAYS_INTERVAL_SECS: i64 = 60;

/// Outcome of one job within a tick, for observers and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickOutcome {
    pub job_id: String,
    pub result: ExecutionResult,
}

struct Inner {
    jobs: Vec<JobDefinition>,
    tracker: JobStateTracker,
}

/// Single-instance job scheduler.
///
/// Construct one per process and share it by `Arc`; there is no
/// ambient global. Ticks are non-reentrant: a tick arriving while the
/// previous one is still executing is skipped, never queued. Within a
/// tick jobs run sequentially, so resource use stays bounded.
pub struct JobScheduler {
    store: Arc<JobStore>,
    gate: CapabilityGate,
    executor: Arc<dyn JobExecutor>,
    inner: RwLock<Inner>,
    /// Held for the whole of a tick or a facade mutation. `run_pending`
    /// try-locks (skip on busy); everything else waits.
    tick_lock: Mutex<()>,
}

impl JobScheduler {
    pub fn new(
        store: Arc<JobStore>,
        provider: Arc<dyn CapabilityProvider>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            store,
            gate: CapabilityGate::new(provider),
            executor,
            inner: RwLock::new(Inner {
                jobs: Vec::new(),
                tracker: JobStateTracker::new(),
            }),
            tick_lock: Mutex::new(()),
        }
    }

    /// Load job definitions from the store. Runtime state is untouched.
    pub async fn load(&self) -> Result<(), SchedulerError> {
        let config = self.store.load()?;
        info!(jobs = config.jobs.len(), "Loaded scheduler jobs");
        self.inner.write().await.jobs = config.jobs;
        Ok(())
    }

    /// Re-read the store from disk and replace the job list.
    pub async fn reload(&self) -> Result<(), SchedulerError> {
        let config = self.store.reload()?;
        info!(jobs = config.jobs.len(), "Reloaded scheduler jobs");
        self.inner.write().await.jobs = config.jobs;
        Ok(())
    }

    /// Current capability level as seen by the gate.
    pub fn level(&self) -> CapabilityLevel {
        self.gate.level()
    }

    /// Snapshot of the current job definitions.
    pub async fn jobs(&self) -> Vec<JobDefinition> {
        self.inner.read().await.jobs.clone()
    }

    /// Runtime state of one job (defaults for unseen ids).
    pub async fn runtime(&self, id: &str) -> JobRuntimeState {
        self.inner.read().await.tracker.get(id)
    }

    /// Tick: run every due job once, at the current wall-clock time.
    pub async fn run_pending(&self) -> Vec<TickOutcome> {
        self.run_pending_at(Utc::now()).await
    }

    /// Tick at an explicit instant. A tick that arrives while the
    /// previous one is still executing is skipped entirely.
    pub async fn run_pending_at(&self, now: DateTime<Utc>) -> Vec<TickOutcome> {
        let Ok(_tick) = self.tick_lock.try_lock() else {
            debug!("Previous tick still executing, skipping");
            return Vec::new();
        };

        let due: Vec<JobDefinition> = {
            let inner = self.inner.read().await;
            self.gate
                .eligible(&inner.jobs)
                .into_iter()
                .filter(|job| should_run(job, &inner.tracker.get(&job.id), now))
                .cloned()
                .collect()
        };

        let mut outcomes = Vec::with_capacity(due.len());
        for job in due {
            // Sequential on purpose: one child process at a time.
            let result = self.execute(&job, now).await;
            outcomes.push(TickOutcome {
                job_id: job.id.clone(),
                result,
            });
        }
        outcomes
    }

    /// Run one job immediately, bypassing schedule evaluation but not
    /// the running-state guard or the tick lock.
    pub async fn run_now(&self, id: &str) -> Result<ExecutionResult, SchedulerError> {
        let _tick = self.tick_lock.lock().await;

        let job = {
            let inner = self.inner.read().await;
            let Some(job) = inner.jobs.iter().find(|j| j.id == id).cloned() else {
                return Err(SchedulerError::UnknownJob(id.to_string()));
            };
            if inner.tracker.get(id).state == JobState::Running {
                return Err(SchedulerError::AlreadyRunning(id.to_string()));
            }
            job
        };

        Ok(self.execute(&job, Utc::now()).await)
    }

    /// Insert or replace a job definition and persist the document.
    /// Validation happens in the facade before this is called.
    pub async fn upsert_job(&self, job: JobDefinition) -> Result<(), SchedulerError> {
        let _tick = self.tick_lock.lock().await;
        let mut inner = self.inner.write().await;
        match inner.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => inner.jobs.push(job),
        }
        self.persist(&inner)
    }

    /// Remove a job by id; reports whether a removal occurred.
    pub async fn remove_job(&self, id: &str) -> Result<bool, SchedulerError> {
        let _tick = self.tick_lock.lock().await;
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|j| j.id != id);
        if inner.jobs.len() == before {
            return Ok(false);
        }
        inner.tracker.remove(id);
        self.persist(&inner)?;
        Ok(true)
    }

    /// Write the current job list back through the store, keeping the
    /// stored level and any foreign top-level keys intact.
    fn persist(&self, inner: &Inner) -> Result<(), SchedulerError> {
        let mut config = self.store.load()?;
        config.jobs = inner.jobs.clone();
        self.store.save(&config)?;
        Ok(())
    }

    /// Run one job through the full state machine. Caller must hold
    /// the tick lock.
    async fn execute(&self, job: &JobDefinition, now: DateTime<Utc>) -> ExecutionResult {
        {
            let mut inner = self.inner.write().await;
            let rt = inner.tracker.entry(&job.id);
            rt.state = JobState::Running;
            // Marked before execution: the dedup guard must hold even
            // if the process dies mid-run.
            rt.last_run_at = Some(now);
        }

        info!(job_id = %job.id, "Executing job");
        let result = self.executor.run(job, now).await;

        let mut inner = self.inner.write().await;
        let rt = inner.tracker.entry(&job.id);
        rt.state = if result.ok {
            JobState::Success
        } else {
            JobState::Failed
        };
        rt.last_result = Some(result.clone());
        if job.is_continuous() && job.run_always {
            rt.next_run_at = Some(now + Duration::seconds(RUN_ALWAYS_INTERVAL_SECS));
        }

        if result.ok {
            info!(job_id = %job.id, return_code = result.return_code, "Job succeeded");
        } else {
            warn!(
                job_id = %job.id,
                return_code = result.return_code,
                error = ?result.error,
                "Job failed"
            );
        }

        // Every invocation ends back at idle; the outcome lives in
        // last_result.
        rt.state = JobState::Idle;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use quantbot_types::ErrorCode;
    use std::sync::Mutex as StdMutex;

    use crate::gate::FixedCapability;

    /// Executor stub: records calls, derives the outcome from the
    /// job's command ("exit N" fails with code N, "timeout" times
    /// out, anything else succeeds).
    struct StubExecutor {
        calls: StdMutex<Vec<String>>,
        delay: std::time::Duration,
    }

    impl StubExecutor {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                delay: std::time::Duration::ZERO,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                delay: std::time::Duration::from_millis(delay_ms),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobExecutor for StubExecutor {
        async fn run(&self, job: &JobDefinition, _now: DateTime<Utc>) -> ExecutionResult {
            self.calls.lock().unwrap().push(job.id.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if job.command == "timeout" {
                ExecutionResult::failed(ErrorCode::Timeout, Some("stub timeout".into()))
            } else if let Some(code) = job.command.strip_prefix("exit ") {
                ExecutionResult::completed(code.parse().unwrap(), String::new(), String::new())
            } else {
                ExecutionResult::completed(0, "ok".into(), String::new())
            }
        }
    }

    fn job(id: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            enabled: true,
            command: "ok".to_string(),
            weekday: None,
            hour: None,
            minute: None,
            run_always: false,
            required_level: None,
        }
    }

    fn store_with_jobs(dir: &tempfile::TempDir, jobs: Vec<JobDefinition>) -> Arc<JobStore> {
        let store = Arc::new(JobStore::open(dir.path().join("scheduler.toml")));
        let mut config = store.load().unwrap();
        config.jobs = jobs;
        store.save(&config).unwrap();
        store
    }

    async fn scheduler(
        dir: &tempfile::TempDir,
        jobs: Vec<JobDefinition>,
        executor: Arc<dyn JobExecutor>,
    ) -> JobScheduler {
        let store = store_with_jobs(dir, jobs);
        let sched = JobScheduler::new(
            store,
            Arc::new(FixedCapability(CapabilityLevel::Master)),
            executor,
        );
        sched.load().await.unwrap();
        sched
    }

    // 2024-01-01 is a Monday.
    fn monday_0300() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fixed_time_job_runs_once_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut weekly = job("retrain_weekly");
        weekly.weekday = Some(0);
        weekly.hour = Some(3);
        weekly.minute = Some(0);
        let sched = scheduler(&dir, vec![weekly], exec.clone()).await;

        let now = monday_0300();
        let outcomes = sched.run_pending_at(now).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].job_id, "retrain_weekly");
        assert_eq!(sched.runtime("retrain_weekly").await.last_run_at, Some(now));

        // 30 seconds later, same slot: dedup guard holds.
        let outcomes = sched
            .run_pending_at(now + Duration::seconds(30))
            .await;
        assert!(outcomes.is_empty());
        assert_eq!(exec.calls(), vec!["retrain_weekly"]);
    }

    #[tokio::test]
    async fn test_run_always_job_honors_interval() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut heartbeat = job("heartbeat");
        heartbeat.run_always = true;
        let sched = scheduler(&dir, vec![heartbeat], exec.clone()).await;

        let t0 = monday_0300();
        assert_eq!(sched.run_pending_at(t0).await.len(), 1);
        assert_eq!(
            sched.runtime("heartbeat").await.next_run_at,
            Some(t0 + Duration::seconds(60))
        );

        assert!(sched.run_pending_at(t0 + Duration::seconds(30)).await.is_empty());
        assert_eq!(sched.run_pending_at(t0 + Duration::seconds(61)).await.len(), 1);
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_state_returns_to_idle_and_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut failing = job("report");
        failing.run_always = true;
        failing.command = "exit 2".to_string();
        let sched = scheduler(&dir, vec![failing], exec).await;

        let outcomes = sched.run_pending_at(monday_0300()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].result.ok);
        assert_eq!(outcomes[0].result.return_code, 2);

        let rt = sched.runtime("report").await;
        assert_eq!(rt.state, JobState::Idle);
        let last = rt.last_result.unwrap();
        assert!(!last.ok);
        assert_eq!(last.return_code, 2);
        assert!(last.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut first = job("flaky");
        first.run_always = true;
        first.command = "timeout".to_string();
        let mut second = job("steady");
        second.run_always = true;
        let sched = scheduler(&dir, vec![first, second], exec.clone()).await;

        let outcomes = sched.run_pending_at(monday_0300()).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[0].result.error_code(),
            Some(ErrorCode::Timeout)
        );
        assert!(outcomes[1].result.ok);
        assert_eq!(exec.calls(), vec!["flaky", "steady"]);
        assert_eq!(sched.runtime("flaky").await.state, JobState::Idle);
    }

    #[tokio::test]
    async fn test_capability_limit_caps_tick() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let jobs: Vec<JobDefinition> = (0..3)
            .map(|i| {
                let mut j = job(&format!("j{i}"));
                j.run_always = true;
                j
            })
            .collect();
        let store = store_with_jobs(&dir, jobs);
        let sched = JobScheduler::new(
            store,
            Arc::new(FixedCapability(CapabilityLevel::Basic)),
            exec.clone(),
        );
        sched.load().await.unwrap();

        let outcomes = sched.run_pending_at(monday_0300()).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(exec.calls(), vec!["j0"]);
    }

    #[tokio::test]
    async fn test_required_level_excluded_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut locked = job("locked");
        locked.run_always = true;
        locked.required_level = Some(4);
        let store = store_with_jobs(&dir, vec![locked]);
        let sched = JobScheduler::new(
            store,
            Arc::new(FixedCapability(CapabilityLevel::Pro)),
            exec.clone(),
        );
        sched.load().await.unwrap();

        assert!(sched.run_pending_at(monday_0300()).await.is_empty());
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::slow(200));
        let mut slow = job("slow");
        slow.run_always = true;
        let sched = Arc::new(scheduler(&dir, vec![slow], exec.clone()).await);

        let first = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.run_pending_at(monday_0300()).await })
        };
        // Let the first tick take the lock and start executing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = sched.run_pending_at(monday_0300()).await;
        assert!(second.is_empty());

        let first = first.await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_now_bypasses_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut weekly = job("retrain_weekly");
        weekly.weekday = Some(0);
        weekly.hour = Some(3);
        weekly.minute = Some(0);
        let sched = scheduler(&dir, vec![weekly], exec.clone()).await;

        let result = sched.run_now("retrain_weekly").await.unwrap();
        assert!(result.ok);
        assert_eq!(exec.calls(), vec!["retrain_weekly"]);

        assert!(matches!(
            sched.run_now("nope").await,
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_job_discards_runtime_state_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(StubExecutor::new());
        let mut hb = job("heartbeat");
        hb.run_always = true;
        let sched = scheduler(&dir, vec![hb], exec).await;

        sched.run_pending_at(monday_0300()).await;
        assert!(sched.runtime("heartbeat").await.last_run_at.is_some());

        assert!(sched.remove_job("heartbeat").await.unwrap());
        assert!(!sched.remove_job("heartbeat").await.unwrap());
        assert!(sched.runtime("heartbeat").await.last_run_at.is_none());

        let on_disk = JobStore::open(dir.path().join("scheduler.toml"))
            .load()
            .unwrap();
        assert!(on_disk.jobs.is_empty());
    }
}
