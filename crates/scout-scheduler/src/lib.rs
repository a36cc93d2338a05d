//! `scout-scheduler`: polling job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Job executions live in a SQLite `job_executions` table next to the
//! `job_configurations` they run. The [`manager::SchedulerManager`] drives a
//! [`engine::SchedulingEngine`] once per poll interval; each tick fetches the
//! eligible executions and, for every one of them, takes an optimistic lock,
//! runs the executor registered for the configuration's `kind` and records
//! the outcome.
//!
//! # Execution lifecycle
//!
//! | From              | Condition                          | To        |
//! |-------------------|------------------------------------|-----------|
//! | `pending`         | lock lost to another worker        | `pending` |
//! | `pending` (locked)| `attempt_count > max_retries`      | `failed`  |
//! | `pending` (locked)| executor succeeded                 | `completed` |
//! | `pending` (locked)| executor failed, retries left      | `pending` |
//! | `pending` (locked)| unknown kind or invalid payload    | `failed`  |
//!
//! `attempt_count` is both the retry counter and the lock version: the lock
//! is a conditional `UPDATE` that bumps it only if it still holds the value
//! read by `find_eligible`. A crashed worker leaves the row behind with an
//! aging `updated_at`, and it becomes eligible again once the cooldown passes.

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manager;
pub mod seed;
pub mod store;
pub mod types;

pub use engine::{EngineConfig, SchedulingEngine, TickReport, MAX_RETRIES_EXCEEDED};
pub use error::{Result, SchedulerError};
pub use executor::{Executor, ExecutorError, ExecutorRegistry};
pub use manager::{shutdown_on_signal, ManagerConfig, SchedulerManager, ShutdownHandle};
pub use store::{JobStore, SqliteJobStore};
pub use types::{ExecutionState, JobConfiguration, JobExecution, LockOutcome, LockedJob};
