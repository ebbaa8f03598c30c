//! Task body abstraction.

use std::future::Future;

use async_trait::async_trait;

use super::error::TaskError;
use super::task::TaskContext;

/// Executable body of a task.
///
/// The body may run more than once: a preempted run is aborted at its next
/// await point and the body is invoked again from the start when the task is
/// re-admitted. Bodies therefore take `&self` and should be safe to repeat.
///
/// Any `Fn(TaskContext) -> impl Future<Output = Result<R, TaskError>>` closure
/// is a body.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use adaptive_resource_manager::core::{TaskBody, TaskContext, TaskError};
///
/// struct Summarize {
///     document: String,
/// }
///
/// #[async_trait]
/// impl TaskBody<String> for Summarize {
///     async fn run(&self, ctx: TaskContext) -> Result<String, TaskError> {
///         Ok(format!("{}: {} chars", ctx.task_id, self.document.len()))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskBody<R>: Send + Sync + 'static {
    /// Run the task once.
    ///
    /// # Errors
    ///
    /// A returned error fails the task; it is not retried.
    async fn run(&self, ctx: TaskContext) -> Result<R, TaskError>;
}

#[async_trait]
impl<R, F, Fut> TaskBody<R> for F
where
    R: Send + 'static,
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<R, TaskError> {
        (self)(ctx).await
    }
}
