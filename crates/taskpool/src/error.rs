//! Error types for the task pool.
//!
//! This module defines the central `Error` enum, which captures every misuse
//! of the pool lifecycle that the pool can detect and report. Failures inside
//! a job are not represented here: a job owns its own error reporting and a
//! panicking job is contained (and logged) by the worker that ran it.
//!
//! ## Error Cases
//! - `NotStarted`: A submission or stop arrived before `start` completed.
//! - `AlreadyStarted`: `start` or `resize` was called on a started pool.
//! - `ShuttingDown`: The pool is draining and no longer accepts jobs.
//! - `Stopped`: The pool has been stopped for good.
//! - `InvalidSize`: A worker count outside `(0, MAX_POOL_SIZE)` was requested.
//! - `TaskFailed`: The dispatcher task terminated abnormally.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the task pool.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool has not finished starting.
    #[error("Task pool has not been started")]
    NotStarted,

    /// The pool is already starting, running, or draining.
    #[error("Task pool has already been started")]
    AlreadyStarted,

    /// The pool is draining and refuses new work.
    #[error("Task pool is shutting down")]
    ShuttingDown,

    /// The pool has been stopped and cannot be restarted.
    #[error("Task pool has been stopped")]
    Stopped,

    /// The requested worker count is out of bounds.
    #[error("Invalid pool size {size}: must be greater than 0 and less than {max}")]
    InvalidSize { size: usize, max: usize },

    /// An internal pool task (the dispatcher) panicked or was aborted.
    #[error("Task failure: {context}")]
    TaskFailed { context: String },
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            context: err.to_string(),
        }
    }
}
