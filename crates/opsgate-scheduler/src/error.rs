//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur when launching probe runs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown probe: {0}")]
    UnknownProbe(String),

    /// A run for this key is already in flight. Distinct from any probe
    /// failure — the caller asked at a busy moment, nothing is broken.
    #[error("probe already running: {0}")]
    AlreadyRunning(String),

    #[error("state store error: {0}")]
    State(#[from] opsgate_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
