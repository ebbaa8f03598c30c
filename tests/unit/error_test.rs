//! Tests for error handling

use adaptive_resource_manager::core::{SchedulerError, TaskError};

#[test]
fn test_scheduler_error_display() {
    assert_eq!(
        SchedulerError::ShuttingDown.to_string(),
        "scheduler is shutting down"
    );
    assert_eq!(
        SchedulerError::DuplicateTask("t-1".into()).to_string(),
        "duplicate task id: t-1"
    );
    assert_eq!(
        SchedulerError::Cancelled("t-2".into()).to_string(),
        "task t-2 cancelled by shutdown"
    );
    assert_eq!(
        SchedulerError::InvalidConfig("bad".into()).to_string(),
        "invalid configuration: bad"
    );
}

#[test]
fn test_task_error_display() {
    assert_eq!(TaskError::failed("no model").to_string(), "no model");
    assert_eq!(
        TaskError::Panicked("index out of bounds".into()).to_string(),
        "task body panicked: index out of bounds"
    );
}

#[test]
fn test_task_failure_wraps_body_error() {
    let err = SchedulerError::TaskFailed {
        task_id: "job".into(),
        source: TaskError::Panicked("oops".into()),
    };
    assert_eq!(err.to_string(), "task job failed: task body panicked: oops");
    let anyhow_err = anyhow::Error::new(err);
    assert!(anyhow_err.chain().any(|e| e.to_string() == "task body panicked: oops"));
}

#[test]
fn test_body_can_use_question_mark_on_anyhow() {
    fn body() -> Result<u32, TaskError> {
        let value: u32 = "x".parse().map_err(anyhow::Error::from)?;
        Ok(value)
    }
    assert!(matches!(body(), Err(TaskError::Failed(_))));
}
