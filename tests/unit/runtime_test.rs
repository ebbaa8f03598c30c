//! Tests for runtime adapters and the API surface

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adaptive_resource_manager::config::ManagerConfig;
use adaptive_resource_manager::core::{
    AdaptiveResourceManager, PriorityBand, TaskContext, TaskError,
};
use adaptive_resource_manager::runtime::{health, snapshot, submit_task, TaskSubmission, TokioSpawner};

fn manual_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_scheduler_interval(Duration::from_secs(3_600))
        .with_shutdown_timeout(Duration::from_millis(100))
}

async fn describe(ctx: TaskContext) -> Result<String, TaskError> {
    Ok(format!("{}:{}", ctx.task_type, ctx.attempt))
}

#[test]
fn test_spawner_outside_runtime_errors() {
    assert!(TokioSpawner::current().is_err());
}

#[tokio::test]
async fn test_spawner_runs_futures() {
    let spawner = TokioSpawner::current().unwrap();
    assert_eq!(spawner.spawn(async { 21 * 2 }).await.unwrap(), 42);
}

#[test]
fn test_submission_defaults() {
    let meta = serde_json::from_str::<TaskSubmission>("{}")
        .unwrap()
        .into_metadata();
    assert!(meta.id.is_empty());
    assert_eq!(meta.task_type, "generic");
    assert!((meta.base_priority - 50.0).abs() < f64::EPSILON);
    assert!(meta.deadline.is_none());
    assert!(!meta.is_system);
}

#[test]
fn test_submission_converts_epoch_millis() {
    let req: TaskSubmission = serde_json::from_value(serde_json::json!({
        "task_id": "job-7",
        "task_type": "chat",
        "base_priority": 40.0,
        "deadline_ms": 1_700_000_000_000_u64,
        "user_id": "u-1",
        "required_capabilities": ["gpu"],
    }))
    .unwrap();
    let meta = req.into_metadata();
    assert_eq!(meta.id, "job-7");
    assert_eq!(meta.user_id.as_deref(), Some("u-1"));
    assert_eq!(meta.required_capabilities, ["gpu"]);
    assert_eq!(
        meta.deadline,
        Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_000))
    );
}

#[tokio::test]
async fn test_submit_task_snapshot_and_health() {
    let manager: AdaptiveResourceManager<String> =
        AdaptiveResourceManager::new(manual_config()).unwrap();
    let req = TaskSubmission {
        task_id: Some("api-1".into()),
        task_type: Some("report".into()),
        base_priority: Some(20.0),
        created_at_ms: Some(
            u64::try_from(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap()
                    .as_millis(),
            )
            .unwrap(),
        ),
        ..TaskSubmission::default()
    };
    let handle = submit_task(&manager, req, describe).unwrap();
    assert_eq!(handle.band(), PriorityBand::Critical);

    let snap = snapshot(&manager);
    assert!(snap.running);
    assert_eq!(snap.queues.total(), 1);
    assert_eq!(snap.metrics.tasks_enqueued, 1);
    assert!(snap.active_tasks.is_empty());
    let oldest = snap
        .queues
        .band(PriorityBand::Critical)
        .and_then(|b| b.oldest.clone())
        .unwrap();
    assert_eq!(oldest.task_id, "api-1");

    let status = health(&manager);
    assert!(status.ok);
    assert_eq!(status.queued, 1);

    manager.schedule_once().unwrap();
    assert_eq!(handle.await.unwrap(), "report:1");

    manager.shutdown().await;
    let status = health(&manager);
    assert!(!status.ok);
    assert!(!status.running);
}
