use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job store could not be reached or rejected the statement.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    /// A payload or result could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job configuration with the given ID exists in the store.
    #[error("Job configuration not found: {id}")]
    ConfigurationNotFound { id: String },

    /// No job execution with the given ID exists in the store.
    #[error("Job execution not found: {id}")]
    ExecutionNotFound { id: String },

    /// A stored row violates the data model (e.g. unknown state text).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A thread panicked while holding the store connection.
    #[error("Store connection lock poisoned")]
    LockPoisoned,

    /// Too many consecutive ticks failed; the loop stopped itself.
    #[error("Systemic failure after {consecutive} consecutive failed ticks: {last_error}")]
    SystemicFailure { consecutive: u32, last_error: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
