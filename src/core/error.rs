//! Error types for scheduler operations.

use thiserror::Error;

use super::task::TaskId;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The manager is draining or stopped and accepts no new work.
    #[error("scheduler is shutting down")]
    ShuttingDown,
    /// A task with this id is already queued or executing.
    #[error("duplicate task id: {0}")]
    DuplicateTask(TaskId),
    /// Task descriptor failed validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// The task body returned an error or panicked.
    #[error("task {task_id} failed: {source}")]
    TaskFailed {
        /// Failed task.
        task_id: TaskId,
        /// Error reported by the body.
        #[source]
        source: TaskError,
    },
    /// The result channel closed before the task finished.
    #[error("result for task {0} was dropped")]
    ResultDropped(TaskId),
    /// The task was still queued when the manager shut down.
    #[error("task {0} cancelled by shutdown")]
    Cancelled(TaskId),
    /// No usable async runtime.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Scheduler state was found inconsistent during a tick.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error returned by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The body reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The body panicked while running.
    #[error("task body panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Convenience constructor for a plain failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
