use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::LockedJob;

/// Failure raised by an [`Executor`] for one attempt.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Business failure; the attempt may be retried after the cooldown.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// No executor is registered for the configuration's kind.
    #[error("Unknown job kind: {kind}")]
    UnknownJobKind { kind: String },

    /// The configuration payload can never be run by its executor.
    #[error("Invalid payload for '{kind}': {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// The attempt exceeded the configured per-attempt timeout.
    #[error("Attempt timed out after {secs}s")]
    TimedOut { secs: u64 },
}

impl ExecutorError {
    /// Configuration defects: retrying cannot help, so the execution fails
    /// right away instead of burning cooldown cycles.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutorError::UnknownJobKind { .. } | ExecutorError::InvalidPayload { .. }
        )
    }
}

/// Runs one job's business logic for exactly one attempt.
///
/// Returns the success payload stored in `success_result`. May take as long
/// as it needs; cancellation and timeouts belong to the caller.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &LockedJob) -> Result<serde_json::Value, ExecutorError>;
}

/// Dispatches a [`LockedJob`] to the executor registered for its `kind`.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[async_trait]
impl Executor for ExecutorRegistry {
    async fn execute(&self, job: &LockedJob) -> Result<serde_json::Value, ExecutorError> {
        match self.get(job.kind()) {
            Some(executor) => executor.execute(job).await,
            None => Err(ExecutorError::UnknownJobKind {
                kind: job.kind().to_string(),
            }),
        }
    }
}
