use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{
        format_timestamp, parse_timestamp, ExecutionState, JobConfiguration, JobExecution,
        LockOutcome,
    },
};

/// Race-safe access to job executions, as seen by the scheduling engine.
///
/// Every call re-reads the store; implementations must not cache rows
/// between calls. Concurrency control lives entirely in
/// [`JobStore::try_acquire_lock`].
pub trait JobStore: Send + Sync {
    /// Pending executions that were never attempted or whose cooldown has
    /// elapsed, oldest `updated_at` first, at most `limit` rows.
    fn find_eligible(&self, limit: u32, cooldown: Duration) -> Result<Vec<JobExecution>>;

    /// Compare-and-swap on `attempt_count`: bumps it to
    /// `expected_attempt_count + 1` and stamps `updated_at`, only if the row
    /// still holds `expected_attempt_count`. Losing the race is not an error.
    fn try_acquire_lock(
        &self,
        execution_id: &str,
        expected_attempt_count: u32,
    ) -> Result<LockOutcome>;

    /// Persist `state`, `updated_at`, `success_result` and `error_result`.
    ///
    /// Never touches `attempt_count`. The write only lands while the row is
    /// still pending and still at the caller's `attempt_count`; returns
    /// whether a row was written.
    fn record_outcome(&self, execution: &JobExecution) -> Result<bool>;

    fn get_configuration(&self, id: &str) -> Result<Option<JobConfiguration>>;
}

/// SQLite-backed [`JobStore`].
///
/// Wraps a single connection in a `Mutex`. Several stores (or processes) may
/// open the same database file; they coordinate through SQLite's write lock
/// and the conditional update in `try_acquire_lock`, not through this mutex.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Insert a configuration or fully replace its `kind` and `payload`.
    /// `created_at` survives replacement.
    #[instrument(skip(self, payload))]
    pub fn upsert_configuration(
        &self,
        id: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<JobConfiguration> {
        let now = format_timestamp(now());
        let payload_json = serde_json::to_string(payload)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_configurations (id, kind, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![id, kind, payload_json, now],
        )?;
        let config = conn.query_row(
            "SELECT id, kind, payload, created_at, updated_at
             FROM job_configurations WHERE id = ?1",
            [id],
            row_to_configuration,
        )?;
        debug!("configuration upserted");
        Ok(config)
    }

    /// All configurations, oldest first.
    pub fn list_configurations(&self) -> Result<Vec<JobConfiguration>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, created_at, updated_at
             FROM job_configurations ORDER BY created_at, id",
        )?;
        let configs = stmt
            .query_map([], row_to_configuration)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(configs)
    }

    /// Schedule a fresh, never-attempted execution of `config_id`.
    #[instrument(skip(self))]
    pub fn create_execution(&self, config_id: &str) -> Result<JobExecution> {
        let conn = self.conn()?;
        let known: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM job_configurations WHERE id = ?1)",
            [config_id],
            |row| row.get(0),
        )?;
        if !known {
            return Err(SchedulerError::ConfigurationNotFound {
                id: config_id.to_string(),
            });
        }

        let now = now();
        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO job_executions
             (id, config_id, state, attempt_count, created_at, updated_at,
              success_result, error_result)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3, NULL, NULL)",
            params![id, config_id, format_timestamp(now)],
        )?;
        info!(execution_id = %id, "execution created");

        Ok(JobExecution {
            id,
            config_id: config_id.to_string(),
            state: ExecutionState::Pending,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
            success_result: None,
            error_result: None,
        })
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<JobExecution>> {
        let conn = self.conn()?;
        let execution = conn
            .query_row(
                "SELECT id, config_id, state, attempt_count, created_at, updated_at,
                        success_result, error_result
                 FROM job_executions WHERE id = ?1",
                [id],
                row_to_execution,
            )
            .optional()?;
        Ok(execution)
    }

    /// Most recently touched executions of a configuration, newest first,
    /// optionally restricted to one state.
    pub fn recent_executions(
        &self,
        config_id: &str,
        state: Option<ExecutionState>,
        limit: u32,
    ) -> Result<Vec<JobExecution>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, config_id, state, attempt_count, created_at, updated_at,
                    success_result, error_result
             FROM job_executions
             WHERE config_id = ?1 AND (?2 IS NULL OR state = ?2)
             ORDER BY updated_at DESC
             LIMIT ?3",
        )?;
        let executions = stmt
            .query_map(
                params![config_id, state.map(|s| s.as_str()), limit],
                row_to_execution,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    pub fn has_pending_execution(&self, config_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let pending = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM job_executions WHERE config_id = ?1 AND state = 'pending'
             )",
            [config_id],
            |row| row.get(0),
        )?;
        Ok(pending)
    }

    /// Overwrite the lock fields of a row directly. Lets tests place an
    /// execution anywhere on the retry/cooldown timeline.
    #[cfg(test)]
    pub(crate) fn force_lock_fields(
        &self,
        id: &str,
        attempt_count: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE job_executions SET attempt_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![attempt_count, format_timestamp(updated_at), id],
        )?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn find_eligible(&self, limit: u32, cooldown: Duration) -> Result<Vec<JobExecution>> {
        let cooldown = chrono::Duration::from_std(cooldown)
            .map_err(|e| SchedulerError::InvalidState(format!("cooldown out of range: {e}")))?;
        let threshold = now()
            .checked_sub_signed(cooldown)
            .map(format_timestamp)
            .ok_or_else(|| SchedulerError::InvalidState("cooldown out of range".to_string()))?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, config_id, state, attempt_count, created_at, updated_at,
                    success_result, error_result
             FROM job_executions
             WHERE state = 'pending' AND (attempt_count = 0 OR updated_at < ?1)
             ORDER BY updated_at ASC
             LIMIT ?2",
        )?;
        let executions = stmt
            .query_map(params![threshold, limit], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    fn try_acquire_lock(
        &self,
        execution_id: &str,
        expected_attempt_count: u32,
    ) -> Result<LockOutcome> {
        let next_attempt = expected_attempt_count.checked_add(1).ok_or_else(|| {
            SchedulerError::InvalidState(format!("attempt_count overflow on {execution_id}"))
        })?;
        let now = format_timestamp(now());

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so contending connections
        // queue on busy_timeout; the conditional UPDATE is the whole CAS.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let locked = tx
            .query_row(
                "UPDATE job_executions
                 SET attempt_count = ?1, updated_at = ?2
                 WHERE id = ?3 AND attempt_count = ?4 AND state = 'pending'
                 RETURNING id, config_id, state, attempt_count, created_at, updated_at,
                           success_result, error_result",
                params![next_attempt, now, execution_id, expected_attempt_count],
                row_to_execution,
            )
            .optional()?;
        tx.commit()?;

        Ok(match locked {
            Some(execution) => LockOutcome::Acquired(execution),
            None => LockOutcome::NotAcquired,
        })
    }

    fn record_outcome(&self, execution: &JobExecution) -> Result<bool> {
        let success = execution
            .success_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error = execution
            .error_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE job_executions
             SET state = ?1, updated_at = ?2, success_result = ?3, error_result = ?4
             WHERE id = ?5 AND state = 'pending' AND attempt_count = ?6",
            params![
                execution.state.as_str(),
                format_timestamp(execution.updated_at),
                success,
                error,
                execution.id,
                execution.attempt_count,
            ],
        )?;
        if n == 0 {
            debug!(
                execution_id = %execution.id,
                attempt = execution.attempt_count,
                "outcome not recorded: row is terminal or was re-locked"
            );
        }
        Ok(n > 0)
    }

    fn get_configuration(&self, id: &str) -> Result<Option<JobConfiguration>> {
        let conn = self.conn()?;
        let config = conn
            .query_row(
                "SELECT id, kind, payload, created_at, updated_at
                 FROM job_configurations WHERE id = ?1",
                [id],
                row_to_configuration,
            )
            .optional()?;
        Ok(config)
    }
}

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn row_to_configuration(row: &Row<'_>) -> rusqlite::Result<JobConfiguration> {
    let payload: String = row.get(2)?;
    Ok(JobConfiguration {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(2, e))?,
        created_at: timestamp_column(row, 3)?,
        updated_at: timestamp_column(row, 4)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    let state: String = row.get(2)?;
    Ok(JobExecution {
        id: row.get(0)?,
        config_id: row.get(1)?,
        state: state.parse().map_err(|e| conversion_error(2, e))?,
        attempt_count: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
        success_result: json_column(row, 6)?,
        error_result: json_column(row, 7)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| conversion_error(idx, e))
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
