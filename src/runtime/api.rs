//! API-facing request/response models for embedding the manager behind a
//! service or dashboard.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::{
    AdaptiveResourceManager, PoolSnapshot, QueueStats, SchedulerError, SchedulerMetrics, Task,
    TaskBody, TaskHandle, TaskId, TaskMetadata,
};

/// Task submission payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSubmission {
    /// Task identifier; generated when absent.
    pub task_id: Option<TaskId>,
    /// Type tag.
    pub task_type: Option<String>,
    /// Declared priority, 50 when absent.
    pub base_priority: Option<f64>,
    /// Deadline in milliseconds since the epoch.
    pub deadline_ms: Option<u64>,
    /// Owning end user.
    pub user_id: Option<String>,
    /// System task flag.
    pub is_system: bool,
    /// Capabilities the task needs.
    pub required_capabilities: Vec<String>,
    /// Opaque payload.
    pub payload: Option<serde_json::Value>,
    /// Human readable description.
    pub description: Option<String>,
    /// Creation time in milliseconds since the epoch.
    pub created_at_ms: Option<u64>,
}

fn from_epoch_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

impl TaskSubmission {
    /// Metadata described by this submission, with defaults filled in.
    #[must_use]
    pub fn into_metadata(self) -> TaskMetadata {
        let defaults = TaskMetadata::default();
        TaskMetadata {
            id: self.task_id.unwrap_or_default(),
            task_type: self.task_type.unwrap_or(defaults.task_type),
            base_priority: self.base_priority.unwrap_or(defaults.base_priority),
            deadline: self.deadline_ms.map(from_epoch_ms),
            user_id: self.user_id,
            is_system: self.is_system,
            required_capabilities: self.required_capabilities,
            payload: self.payload,
            description: self.description,
            created_at: self.created_at_ms.map(from_epoch_ms),
            ..defaults
        }
    }

    /// Task running `body` with this submission's metadata.
    pub fn into_task<R: Send + 'static>(self, body: impl TaskBody<R>) -> Task<R> {
        let mut task = Task::new(body);
        task.meta = self.into_metadata();
        task
    }
}

/// Submit a deserialized request to a manager.
///
/// # Errors
///
/// Propagates the errors of [`AdaptiveResourceManager::submit`].
pub fn submit_task<R: Send + 'static>(
    manager: &AdaptiveResourceManager<R>,
    req: TaskSubmission,
    body: impl TaskBody<R>,
) -> Result<TaskHandle<R>, SchedulerError> {
    manager.submit(req.into_task(body))
}

/// Full point-in-time view of a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Whether submissions are accepted.
    pub running: bool,
    /// Per-band queue statistics.
    pub queues: QueueStats,
    /// Pool counters and utilization.
    pub pool: PoolSnapshot,
    /// Aggregate counters.
    pub metrics: SchedulerMetrics,
    /// Executing task ids.
    pub active_tasks: Vec<TaskId>,
}

/// Collect a snapshot of a manager.
#[must_use]
pub fn snapshot<R: Send + 'static>(manager: &AdaptiveResourceManager<R>) -> ManagerSnapshot {
    ManagerSnapshot {
        running: manager.is_running(),
        queues: manager.queue_stats(),
        pool: manager.pool_snapshot(),
        metrics: manager.metrics(),
        active_tasks: manager.active_tasks(),
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: running and not saturated.
    pub ok: bool,
    /// Whether submissions are accepted.
    pub running: bool,
    /// Queued task count.
    pub queued: usize,
    /// Executing task count.
    pub active: usize,
    /// Aggregate utilization in `[0, 1]`.
    pub utilization: f64,
}

/// Return a health payload. A stopped manager or one whose aggregate
/// utilization is at its preemption threshold is reported unhealthy.
#[must_use]
pub fn health<R: Send + 'static>(manager: &AdaptiveResourceManager<R>) -> Health {
    let running = manager.is_running();
    let pool = manager.pool_snapshot();
    let utilization = pool.utilization.aggregate();
    Health {
        ok: running && utilization < manager.config().preemption_threshold,
        running,
        queued: manager.queued_len(),
        active: pool.active_tasks,
        utilization,
    }
}
