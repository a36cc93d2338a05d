use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `job_configurations` and `job_executions` tables (idempotent)
/// plus the two execution indexes: one for the eligibility poll and one for
/// "recent outcomes of a configuration" lookups.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_configurations (
            id          TEXT    NOT NULL PRIMARY KEY,
            kind        TEXT    NOT NULL,   -- selects the executor
            payload     TEXT    NOT NULL,   -- opaque JSON for the executor
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_executions (
            id              TEXT    NOT NULL PRIMARY KEY,
            config_id       TEXT    NOT NULL REFERENCES job_configurations (id),
            state           TEXT    NOT NULL DEFAULT 'pending'
                            CHECK (state IN ('pending', 'completed', 'failed')),
            attempt_count   INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,   -- cooldown clock + lock stamp
            success_result  TEXT,               -- JSON or NULL
            error_result    TEXT                -- JSON or NULL
        ) STRICT;

        -- Eligibility poll: WHERE state = 'pending' ... ORDER BY updated_at
        CREATE INDEX IF NOT EXISTS idx_job_executions_state_updated
            ON job_executions (state, updated_at);

        -- Recent outcomes per configuration, newest first
        CREATE INDEX IF NOT EXISTS idx_job_executions_config_recent
            ON job_executions (config_id, state, updated_at DESC);
        ",
    )?;
    Ok(())
}
