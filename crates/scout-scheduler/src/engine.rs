use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, FutureExt, StreamExt};
use scout_core::config::SchedulerConfig;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::Result,
    executor::{Executor, ExecutorError},
    store::{now, JobStore},
    types::{format_timestamp, ExecutionState, JobExecution, LockOutcome, LockedJob},
};

/// `error_result.error` written when an execution runs out of attempts.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Retry policy and batch shape used by [`SchedulingEngine::tick`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cooldown: Duration,
    pub max_retries: u32,
    pub batch_limit: u32,
    /// Executions processed at once within a tick. 1 = sequential.
    pub max_concurrency: usize,
    pub attempt_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for EngineConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            cooldown: cfg.cooldown(),
            max_retries: cfg.max_retries,
            batch_limit: cfg.batch_limit,
            max_concurrency: cfg.max_concurrency,
            attempt_timeout: cfg.attempt_timeout(),
        }
    }
}

/// What happened to each eligible execution during one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub eligible: usize,
    /// Another worker bumped `attempt_count` first.
    pub lock_lost: usize,
    pub completed: usize,
    /// Attempt failed, execution stays pending for a later retry.
    pub retrying: usize,
    pub failed: usize,
    /// Outcome computed but not written: the row was re-locked or finalised
    /// by someone else in the meantime.
    pub superseded: usize,
    /// Unexpected error while processing; the row is left for a later tick.
    pub errored: usize,
    /// Not touched because shutdown was requested before its lock attempt.
    pub skipped: usize,
}

impl TickReport {
    /// Executions whose outcome this tick wrote to the store.
    pub fn processed(&self) -> usize {
        self.completed + self.retrying + self.failed
    }

    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::LockLost => self.lock_lost += 1,
            Disposition::Completed => self.completed += 1,
            Disposition::Retrying => self.retrying += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Superseded => self.superseded += 1,
            Disposition::Errored => self.errored += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    LockLost,
    Completed,
    Retrying,
    Failed,
    Superseded,
    Errored,
    Skipped,
}

impl From<ExecutionState> for Disposition {
    fn from(state: ExecutionState) -> Self {
        match state {
            ExecutionState::Pending => Disposition::Retrying,
            ExecutionState::Completed => Disposition::Completed,
            ExecutionState::Failed => Disposition::Failed,
        }
    }
}

/// Per-execution state machine driven once per tick.
///
/// Holds no execution state between ticks: every tick re-reads the store, and
/// the single-owner guarantee comes from [`JobStore::try_acquire_lock`].
pub struct SchedulingEngine {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    config: EngineConfig,
}

impl SchedulingEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one tick: fetch eligible executions and drive each through
    /// lock → ceiling check → executor → record.
    ///
    /// Only the eligibility query can fail the tick. Errors while processing
    /// a single execution are logged and counted in the report; the rest of
    /// the batch still runs.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<TickReport> {
        let eligible = self
            .store
            .find_eligible(self.config.batch_limit, self.config.cooldown)?;

        let mut report = TickReport {
            eligible: eligible.len(),
            ..TickReport::default()
        };
        if eligible.is_empty() {
            return Ok(report);
        }
        debug!(count = eligible.len(), "eligible executions found");

        let mut outcomes = stream::iter(eligible)
            .map(|execution| self.process_guarded(execution, shutdown))
            .buffer_unordered(self.config.max_concurrency.max(1));
        while let Some(disposition) = outcomes.next().await {
            report.record(disposition);
        }

        if report.processed() > 0 || report.errored > 0 {
            info!(
                completed = report.completed,
                retrying = report.retrying,
                failed = report.failed,
                errored = report.errored,
                "tick finished"
            );
        }
        Ok(report)
    }

    async fn process_guarded(
        &self,
        execution: JobExecution,
        shutdown: &watch::Receiver<bool>,
    ) -> Disposition {
        if *shutdown.borrow() {
            return Disposition::Skipped;
        }
        let id = execution.id.clone();
        match self.process(execution).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(execution_id = %id, "processing execution failed: {e}");
                Disposition::Errored
            }
        }
    }

    #[instrument(skip_all, fields(execution_id = %execution.id))]
    async fn process(&self, execution: JobExecution) -> Result<Disposition> {
        let mut locked = match self
            .store
            .try_acquire_lock(&execution.id, execution.attempt_count)?
        {
            LockOutcome::Acquired(locked) => locked,
            LockOutcome::NotAcquired => {
                debug!("lock taken by another worker");
                return Ok(Disposition::LockLost);
            }
        };
        let attempt = locked.attempt_count;
        info!(attempt, "lock acquired");

        // Checked after locking, so an exhausted execution still consumes
        // one attempt on its way to failed.
        if attempt > self.config.max_retries {
            if locked.error_result.is_none() {
                locked.error_result = Some(serde_json::json!({ "error": MAX_RETRIES_EXCEEDED }));
            }
            warn!(
                attempt,
                max_retries = self.config.max_retries,
                "max retries exceeded"
            );
            return self.finish(locked, ExecutionState::Failed);
        }

        let Some(config) = self.store.get_configuration(&locked.config_id)? else {
            let reason = format!("job configuration {} not found", locked.config_id);
            error!(config_id = %locked.config_id, "{reason}");
            locked.error_result = Some(failure_payload(&reason, attempt));
            return self.finish(locked, ExecutionState::Failed);
        };

        let job = LockedJob {
            execution: locked,
            config,
        };
        let result = self.run_executor(&job).await;
        let kind = job.config.kind;
        let mut execution = job.execution;

        match result {
            Ok(payload) => {
                info!(%kind, attempt, "execution completed");
                execution.success_result = Some(payload);
                execution.error_result = None;
                self.finish(execution, ExecutionState::Completed)
            }
            Err(err) => {
                execution.error_result = Some(failure_payload(&err.to_string(), attempt));
                let next = if err.is_fatal() || attempt > self.config.max_retries {
                    error!(%kind, attempt, "execution failed permanently: {err}");
                    ExecutionState::Failed
                } else {
                    warn!(%kind, attempt, "attempt failed, will retry after cooldown: {err}");
                    ExecutionState::Pending
                };
                self.finish(execution, next)
            }
        }
    }

    /// Executor call with panic capture and the optional per-attempt timeout.
    async fn run_executor(
        &self,
        job: &LockedJob,
    ) -> std::result::Result<serde_json::Value, ExecutorError> {
        let call = AssertUnwindSafe(self.executor.execute(job)).catch_unwind();
        let outcome = match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ExecutorError::TimedOut {
                        secs: limit.as_secs(),
                    })
                }
            },
            None => call.await,
        };
        outcome.unwrap_or_else(|panic| {
            Err(ExecutorError::ExecutionFailed(format!(
                "executor panicked: {}",
                panic_message(&*panic)
            )))
        })
    }

    fn finish(&self, mut execution: JobExecution, state: ExecutionState) -> Result<Disposition> {
        execution.state = state;
        execution.updated_at = now();
        if state == ExecutionState::Failed {
            execution.success_result = None;
        }

        if self.store.record_outcome(&execution)? {
            Ok(state.into())
        } else {
            warn!(
                attempt = execution.attempt_count,
                "outcome discarded: execution was re-locked or finalised elsewhere"
            );
            Ok(Disposition::Superseded)
        }
    }
}

fn failure_payload(message: &str, attempt: u32) -> serde_json::Value {
    serde_json::json!({
        "error": message,
        "attempt": attempt,
        "failed_at": format_timestamp(now()),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::store::SqliteJobStore;
    use crate::types::JobConfiguration;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // --- stub executors ---------------------------------------------------

    #[derive(Default)]
    struct AlwaysOk {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for AlwaysOk {
        async fn execute(
            &self,
            job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "findings": [], "config": job.config.id }))
        }
    }

    #[derive(Default)]
    struct AlwaysFail {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for AlwaysFail {
        async fn execute(
            &self,
            _job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::ExecutionFailed("upstream 503".into()))
        }
    }

    /// Fails for the listed configuration ids, succeeds for the rest.
    struct FailFor(HashSet<String>);

    #[async_trait]
    impl Executor for FailFor {
        async fn execute(
            &self,
            job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            if self.0.contains(&job.config.id) {
                Err(ExecutorError::ExecutionFailed("boom".into()))
            } else {
                Ok(serde_json::json!({ "ok": true }))
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl Executor for Panics {
        async fn execute(
            &self,
            _job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            panic!("agent blew up");
        }
    }

    struct Hangs;

    #[async_trait]
    impl Executor for Hangs {
        async fn execute(
            &self,
            _job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct BadPayload;

    #[async_trait]
    impl Executor for BadPayload {
        async fn execute(
            &self,
            job: &LockedJob,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            Err(ExecutorError::InvalidPayload {
                kind: job.config.kind.clone(),
                reason: "missing field `behavior`".into(),
            })
        }
    }

    /// Delegates to SQLite but refuses to record the outcome of one execution.
    struct RecordFailsFor {
        inner: Arc<SqliteJobStore>,
        execution_id: String,
    }

    impl JobStore for RecordFailsFor {
        fn find_eligible(&self, limit: u32, cooldown: Duration) -> Result<Vec<JobExecution>> {
            self.inner.find_eligible(limit, cooldown)
        }

        fn try_acquire_lock(&self, id: &str, expected: u32) -> Result<LockOutcome> {
            self.inner.try_acquire_lock(id, expected)
        }

        fn record_outcome(&self, execution: &JobExecution) -> Result<bool> {
            if execution.id == self.execution_id {
                return Err(SchedulerError::InvalidState("disk full".into()));
            }
            self.inner.record_outcome(execution)
        }

        fn get_configuration(&self, id: &str) -> Result<Option<JobConfiguration>> {
            self.inner.get_configuration(id)
        }
    }

    /// Another worker locks every row between `find_eligible` and our lock.
    struct LockedElsewhere {
        inner: Arc<SqliteJobStore>,
    }

    impl JobStore for LockedElsewhere {
        fn find_eligible(&self, limit: u32, cooldown: Duration) -> Result<Vec<JobExecution>> {
            let eligible = self.inner.find_eligible(limit, cooldown)?;
            for execution in &eligible {
                self.inner
                    .try_acquire_lock(&execution.id, execution.attempt_count)?;
            }
            Ok(eligible)
        }

        fn try_acquire_lock(&self, id: &str, expected: u32) -> Result<LockOutcome> {
            self.inner.try_acquire_lock(id, expected)
        }

        fn record_outcome(&self, execution: &JobExecution) -> Result<bool> {
            self.inner.record_outcome(execution)
        }

        fn get_configuration(&self, id: &str) -> Result<Option<JobConfiguration>> {
            self.inner.get_configuration(id)
        }
    }

    // --- helpers ------------------------------------------------------------

    fn config() -> EngineConfig {
        EngineConfig {
            cooldown: Duration::from_secs(60),
            max_retries: 3,
            batch_limit: 100,
            max_concurrency: 1,
            attempt_timeout: None,
        }
    }

    fn store() -> Arc<SqliteJobStore> {
        let store = SqliteJobStore::open_in_memory().unwrap();
        for id in ["cfg-a", "cfg-b"] {
            store
                .upsert_configuration(id, "search_agent", &serde_json::json!({ "q": id }))
                .unwrap();
        }
        Arc::new(store)
    }

    fn engine(
        store: &Arc<SqliteJobStore>,
        executor: Arc<dyn Executor>,
        config: EngineConfig,
    ) -> SchedulingEngine {
        SchedulingEngine::new(store.clone(), executor, config)
    }

    fn ago(secs: i64) -> DateTime<Utc> {
        now() - chrono::Duration::seconds(secs)
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    // --- tests --------------------------------------------------------------

    #[tokio::test]
    async fn fresh_execution_completes_on_first_tick() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let executor = Arc::new(AlwaysOk::default());
        let engine = engine(&store, executor.clone(), config());

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.eligible, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Completed);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.success_result.unwrap()["config"], "cfg-a");
        assert_eq!(stored.error_result, None);
    }

    #[tokio::test]
    async fn exhausted_execution_fails_without_running_executor() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        store.force_lock_fields(&execution.id, 4, ago(1)).unwrap();
        let executor = Arc::new(AlwaysOk::default());
        let engine = engine(
            &store,
            executor.clone(),
            EngineConfig {
                cooldown: Duration::ZERO,
                ..config()
            },
        );

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Failed);
        assert_eq!(stored.attempt_count, 5);
        assert_eq!(stored.error_result.unwrap()["error"], MAX_RETRIES_EXCEEDED);
        assert_eq!(stored.success_result, None);
    }

    #[tokio::test]
    async fn exhausted_execution_keeps_its_last_failure_cause() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let executor = Arc::new(AlwaysFail::default());
        let engine = engine(
            &store,
            executor.clone(),
            EngineConfig {
                cooldown: Duration::ZERO,
                max_retries: 1,
                ..config()
            },
        );

        // attempt 1 fails and stays pending
        engine.tick(&running()).await.unwrap();
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Pending);
        store
            .force_lock_fields(&execution.id, stored.attempt_count, ago(1))
            .unwrap();

        // attempt 2 exceeds the ceiling
        let report = engine.tick(&running()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Failed);
        assert_eq!(
            stored.error_result.unwrap()["error"],
            "Execution failed: upstream 503"
        );
    }

    #[tokio::test]
    async fn mixed_batch_completes_one_and_retries_the_other() {
        let store = store();
        let failing = store.create_execution("cfg-a").unwrap();
        let passing = store.create_execution("cfg-b").unwrap();
        let executor = Arc::new(FailFor(HashSet::from(["cfg-a".to_string()])));
        let engine = engine(&store, executor, config());

        let report = engine.tick(&running()).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.retrying, 1);

        let failed = store.get_execution(&failing.id).unwrap().unwrap();
        assert_eq!(failed.state, ExecutionState::Pending);
        assert_eq!(failed.attempt_count, 1);
        let error = failed.error_result.unwrap();
        assert_eq!(error["error"], "Execution failed: boom");
        assert_eq!(error["attempt"], 1);

        let done = store.get_execution(&passing.id).unwrap().unwrap();
        assert_eq!(done.state, ExecutionState::Completed);

        // the failed one is now cooling down
        assert_eq!(engine.tick(&running()).await.unwrap().eligible, 0);
    }

    #[tokio::test]
    async fn terminal_executions_are_left_alone() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let engine = engine(
            &store,
            Arc::new(AlwaysOk::default()),
            EngineConfig {
                cooldown: Duration::ZERO,
                ..config()
            },
        );
        engine.tick(&running()).await.unwrap();
        let done = store.get_execution(&execution.id).unwrap().unwrap();

        for _ in 0..3 {
            let report = engine.tick(&running()).await.unwrap();
            assert_eq!(report.eligible, 0);
        }
        assert_eq!(store.get_execution(&execution.id).unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn one_broken_execution_does_not_stop_the_batch() {
        let sqlite = store();
        let broken = sqlite.create_execution("cfg-a").unwrap();
        let healthy = sqlite.create_execution("cfg-b").unwrap();
        let store = Arc::new(RecordFailsFor {
            inner: sqlite.clone(),
            execution_id: broken.id.clone(),
        });
        let engine = SchedulingEngine::new(store, Arc::new(AlwaysOk::default()), config());

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.errored, 1);
        assert_eq!(report.completed, 1);
        let left = sqlite.get_execution(&broken.id).unwrap().unwrap();
        assert_eq!(left.state, ExecutionState::Pending);
        assert_eq!(left.attempt_count, 1);
        assert_eq!(
            sqlite.get_execution(&healthy.id).unwrap().unwrap().state,
            ExecutionState::Completed
        );
    }

    #[tokio::test]
    async fn lost_lock_skips_execution_for_this_tick() {
        let sqlite = store();
        let execution = sqlite.create_execution("cfg-a").unwrap();
        let store = Arc::new(LockedElsewhere {
            inner: sqlite.clone(),
        });
        let executor = Arc::new(AlwaysOk::default());
        let engine = SchedulingEngine::new(store, executor.clone(), config());

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.eligible, 1);
        assert_eq!(report.lock_lost, 1);
        assert_eq!(report.processed(), 0);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        // only the other worker's lock bumped the counter
        let stored = sqlite.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.state, ExecutionState::Pending);
        assert_eq!(stored.error_result, None);
    }

    #[tokio::test]
    async fn unknown_kind_fails_immediately() {
        let store = store();
        store
            .upsert_configuration("cfg-x", "reddit_scraper", &serde_json::json!({}))
            .unwrap();
        let execution = store.create_execution("cfg-x").unwrap();
        let registry = crate::executor::ExecutorRegistry::new()
            .with("search_agent", Arc::new(AlwaysOk::default()));
        let engine = SchedulingEngine::new(store.clone(), Arc::new(registry), config());

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.failed, 1);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Failed);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(
            stored.error_result.unwrap()["error"],
            "Unknown job kind: reddit_scraper"
        );
    }

    #[tokio::test]
    async fn invalid_payload_fails_immediately() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let engine = engine(&store, Arc::new(BadPayload), config());

        engine.tick(&running()).await.unwrap();
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Failed);
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn executor_panic_is_a_retryable_failure() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let engine = engine(&store, Arc::new(Panics), config());

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.retrying, 1);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Pending);
        let error = stored.error_result.unwrap();
        assert!(error["error"].as_str().unwrap().contains("agent blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let engine = engine(
            &store,
            Arc::new(Hangs),
            EngineConfig {
                attempt_timeout: Some(Duration::from_secs(30)),
                ..config()
            },
        );

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.retrying, 1);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Pending);
        assert_eq!(
            stored.error_result.unwrap()["error"],
            "Attempt timed out after 30s"
        );
    }

    #[tokio::test]
    async fn shutdown_before_locking_consumes_no_attempt() {
        let store = store();
        let execution = store.create_execution("cfg-a").unwrap();
        let executor = Arc::new(AlwaysOk::default());
        let engine = engine(&store, executor.clone(), config());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = engine.tick(&rx).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let stored = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn concurrent_batch_processes_every_execution_once() {
        let store = store();
        let ids: Vec<String> = (0..8)
            .map(|i| {
                let cfg = if i % 2 == 0 { "cfg-a" } else { "cfg-b" };
                store.create_execution(cfg).unwrap().id
            })
            .collect();
        let executor = Arc::new(AlwaysOk::default());
        let engine = engine(
            &store,
            executor.clone(),
            EngineConfig {
                max_concurrency: 4,
                ..config()
            },
        );

        let report = engine.tick(&running()).await.unwrap();

        assert_eq!(report.completed, 8);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
        for id in ids {
            let stored = store.get_execution(&id).unwrap().unwrap();
            assert_eq!(stored.attempt_count, 1);
            assert_eq!(stored.state, ExecutionState::Completed);
        }
    }

    #[tokio::test]
    async fn batch_limit_caps_work_per_tick() {
        let store = store();
        for _ in 0..5 {
            store.create_execution("cfg-a").unwrap();
        }
        let engine = engine(
            &store,
            Arc::new(AlwaysOk::default()),
            EngineConfig {
                batch_limit: 2,
                ..config()
            },
        );

        assert_eq!(engine.tick(&running()).await.unwrap().completed, 2);
        assert_eq!(engine.tick(&running()).await.unwrap().completed, 2);
        assert_eq!(engine.tick(&running()).await.unwrap().completed, 1);
    }

    #[test]
    fn engine_config_follows_scheduler_settings() {
        let mut settings = SchedulerConfig::default();
        settings.attempt_timeout_secs = Some(120);
        settings.max_concurrency = 3;
        let cfg = EngineConfig::from(&settings);
        assert_eq!(cfg.cooldown, Duration::from_secs(600));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_concurrency, 3);
        assert_eq!(cfg.attempt_timeout, Some(Duration::from_secs(120)));
    }
}
