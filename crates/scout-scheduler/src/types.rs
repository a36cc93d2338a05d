use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lifecycle state of a [`JobExecution`].
///
/// Transitions are one-directional: `Pending` → `Completed` or
/// `Pending` → `Failed`. A locked execution is still `Pending` in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Never attempted, or waiting out its cooldown before a retry.
    Pending,
    /// The executor returned a success payload.
    Completed,
    /// Retries exhausted, or the configuration is unrunnable.
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Pending)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown execution state: {0}")]
pub struct ParseStateError(pub String);

impl std::str::FromStr for ExecutionState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionState::Pending),
            "completed" => Ok(ExecutionState::Completed),
            "failed" => Ok(ExecutionState::Failed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// What a job should do: a `kind` selecting the executor plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub id: String,
    /// Discriminator used to pick the executor.
    pub kind: String,
    /// Opaque JSON consumed by the executor.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempt-series scheduled against a [`JobConfiguration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// UUIDv7 primary key.
    pub id: String,
    pub config_id: String,
    pub state: ExecutionState,
    /// Lock acquisitions so far. Doubles as the optimistic-lock version.
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    /// Cooldown clock and last-touched stamp of the lock.
    pub updated_at: DateTime<Utc>,
    pub success_result: Option<serde_json::Value>,
    pub error_result: Option<serde_json::Value>,
}

/// Input handed to an executor: a locked execution with its configuration.
#[derive(Debug, Clone)]
pub struct LockedJob {
    pub execution: JobExecution,
    pub config: JobConfiguration,
}

impl LockedJob {
    pub fn kind(&self) -> &str {
        &self.config.kind
    }

    /// 1-based number of the attempt being run.
    pub fn attempt(&self) -> u32 {
        self.execution.attempt_count
    }
}

/// Result of a compare-and-swap lock attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    /// The caller owns the execution for this attempt.
    Acquired(JobExecution),
    /// Another worker bumped `attempt_count` first.
    NotAcquired,
}

/// Fixed-width RFC 3339 UTC text, so that string order is time order in SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn state_parses_its_own_display() {
        for state in [
            ExecutionState::Pending,
            ExecutionState::Completed,
            ExecutionState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<ExecutionState>().unwrap(), state);
        }
        assert!("running".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ExecutionState::Pending.is_terminal());
        assert!(ExecutionState::Completed.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 59, 59).unwrap();
        let earlier = format_timestamp(base);
        let later = format_timestamp(base + Duration::microseconds(1));
        let much_later = format_timestamp(base + Duration::hours(30));
        assert_eq!(earlier.len(), later.len());
        assert!(earlier < later);
        assert!(later < much_later);
        assert_eq!(earlier, "2026-03-01T09:59:59.000000Z");
    }

    #[test]
    fn timestamp_round_trips_through_text() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap() + Duration::microseconds(42);
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
    }
}
