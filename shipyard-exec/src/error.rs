//! Error types for shipyard-exec.

use thiserror::Error;

/// Errors surfaced by the scheduler. Command execution itself never errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The scheduler has shut down and no longer accepts jobs.
    #[error("scheduler is shut down; job '{job}' was not queued")]
    SchedulerClosed { job: String },

    /// Worker pool size must be at least one.
    #[error("worker pool size must be greater than 0")]
    EmptyPool,
}
