//! Supervisor error types.
//!
//! Most task failures surface as events (they happen off the caller's
//! stack); [`TaskError`] covers only what `start()`/`stop()` can report
//! synchronously.

use thiserror::Error;

/// Errors returned directly from task handle calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// `start()` was called while the task is shutting down.
    #[error("task '{0}' is stopping; try again once it has stopped")]
    Busy(String),

    /// The task's control loop is gone (cancelled or panicked).
    #[error("task '{0}' control loop is no longer running")]
    ControlGone(String),
}
