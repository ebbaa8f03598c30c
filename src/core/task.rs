//! Task descriptors and the scheduler's internal task record.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::error::SchedulerError;
use super::executor::TaskBody;
use super::priority::{PriorityBand, DEFAULT_BASE_PRIORITY};
use super::resource_pool::ResourceRequest;
use crate::infra::queue::Keyed;

/// Unique task identifier.
pub type TaskId = String;

/// Type tag used when a task does not declare one.
pub const DEFAULT_TASK_TYPE: &str = "generic";

/// Metadata describing a task. Everything here except the derived fields is
/// supplied by the caller; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    /// Unique task identifier; generated at submission when empty.
    pub id: TaskId,
    /// Free-form type tag used to bucket prediction history.
    pub task_type: String,
    /// Declared priority before dynamic adjustments.
    pub base_priority: f64,
    /// Absolute deadline.
    pub deadline: Option<SystemTime>,
    /// Owning end user, if any.
    pub user_id: Option<String>,
    /// Whether this is a system task.
    pub is_system: bool,
    /// Capabilities the task needs; each one raises predicted cost.
    pub required_capabilities: Vec<String>,
    /// Opaque payload, only inspected for size heuristics.
    pub payload: Option<serde_json::Value>,
    /// Human readable description, only inspected for token heuristics.
    pub description: Option<String>,
    /// Creation time used for age scoring; defaults to submission time.
    pub created_at: Option<SystemTime>,
    /// Current dynamic score, lower is more urgent.
    pub calculated_priority: f64,
    /// Set when the task is accepted by the manager.
    pub submitted_at: Option<SystemTime>,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            id: TaskId::new(),
            task_type: DEFAULT_TASK_TYPE.to_string(),
            base_priority: DEFAULT_BASE_PRIORITY,
            deadline: None,
            user_id: None,
            is_system: false,
            required_capabilities: Vec::new(),
            payload: None,
            description: None,
            created_at: None,
            calculated_priority: DEFAULT_BASE_PRIORITY,
            submitted_at: None,
        }
    }
}

impl TaskMetadata {
    /// Band of the current dynamic score.
    #[must_use]
    pub fn band(&self) -> PriorityBand {
        PriorityBand::from_score(self.calculated_priority)
    }

    /// Band of the declared base priority.
    #[must_use]
    pub fn declared_band(&self) -> PriorityBand {
        PriorityBand::from_score(self.base_priority)
    }
}

/// Information handed to a task body each time it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// Type tag of the task.
    pub task_type: String,
    /// Score at admission.
    pub priority: f64,
    /// Resources reserved for this run.
    pub allocation: ResourceRequest,
    /// 1 for the first run, incremented after each preemption.
    pub attempt: u32,
    usage: Arc<Mutex<Option<ResourceRequest>>>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        task_type: String,
        priority: f64,
        allocation: ResourceRequest,
        attempt: u32,
    ) -> Self {
        Self {
            task_id,
            task_type,
            priority,
            allocation,
            attempt,
            usage: Arc::new(Mutex::new(None)),
        }
    }

    /// Report resources actually consumed by this run. The last report wins
    /// and replaces the estimate fed back to the predictor.
    pub fn report_usage(&self, usage: ResourceRequest) {
        *self.usage.lock() = Some(usage);
    }

    pub(crate) fn reported_usage(&self) -> Option<ResourceRequest> {
        *self.usage.lock()
    }
}

/// A unit of schedulable work: metadata plus an executable body.
pub struct Task<R> {
    /// Scheduling metadata.
    pub meta: TaskMetadata,
    pub(crate) body: Arc<dyn TaskBody<R>>,
}

impl<R> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("meta", &self.meta).finish_non_exhaustive()
    }
}

impl<R: Send + 'static> Task<R> {
    /// Create a task with default metadata around a body.
    pub fn new(body: impl TaskBody<R>) -> Self {
        Self::from_parts(TaskMetadata::default(), Arc::new(body))
    }

    /// Create a task from existing metadata and a shared body.
    pub fn from_parts(meta: TaskMetadata, body: Arc<dyn TaskBody<R>>) -> Self {
        Self { meta, body }
    }

    /// Set the task id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.meta.id = id.into();
        self
    }

    /// Set the type tag.
    #[must_use]
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.meta.task_type = task_type.into();
        self
    }

    /// Set the declared base priority.
    #[must_use]
    pub fn with_base_priority(mut self, priority: f64) -> Self {
        self.meta.base_priority = priority;
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.meta.deadline = Some(deadline);
        self
    }

    /// Mark the task as owned by an end user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.meta.user_id = Some(user_id.into());
        self
    }

    /// Mark the task as a system task.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.meta.is_system = true;
        self
    }

    /// Set the required capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.meta.payload = Some(payload);
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.meta.description = Some(description.into());
        self
    }

    /// Override the creation time used for age scoring.
    #[must_use]
    pub fn created_at(mut self, at: SystemTime) -> Self {
        self.meta.created_at = Some(at);
        self
    }
}

/// Channel through which the final result reaches the submitter.
pub(crate) type Responder<R> = oneshot::Sender<Result<R, SchedulerError>>;

/// A task owned by the scheduler, either queued or executing.
pub(crate) struct ScheduledTask<R> {
    pub meta: TaskMetadata,
    pub body: Arc<dyn TaskBody<R>>,
    pub responder: Option<Responder<R>>,
    /// Number of times the body has been started.
    pub attempts: u32,
    /// Monotonic submission time, used for wait statistics.
    pub submitted: Instant,
    /// Set on first admission.
    pub first_started: Option<Instant>,
}

impl<R> ScheduledTask<R> {
    /// Deliver the final result, at most once.
    pub fn respond(&mut self, result: Result<R, SchedulerError>) {
        if let Some(tx) = self.responder.take() {
            // The submitter may have dropped its handle.
            let _ = tx.send(result);
        }
    }
}

impl<R> Keyed for ScheduledTask<R> {
    fn key(&self) -> &str {
        &self.meta.id
    }
}
