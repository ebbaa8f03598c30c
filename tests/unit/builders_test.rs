//! Tests for builder modules

use std::time::Duration;

use adaptive_resource_manager::builders::ManagerBuilder;
use adaptive_resource_manager::config::ManagerConfig;
use adaptive_resource_manager::core::{
    AdaptiveResourceManager, InMemoryEventSink, SchedulerError, Task, TaskContext, TaskError,
};
use adaptive_resource_manager::runtime::TokioSpawner;

#[test]
fn test_builder_defaults() {
    let builder = ManagerBuilder::new();
    assert_eq!(builder.config_ref(), &ManagerConfig::default());
}

#[test]
fn test_builder_requires_runtime_without_spawner() {
    let result = ManagerBuilder::new().build::<String>();
    assert!(matches!(result, Err(SchedulerError::Runtime(_))));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let result = ManagerBuilder::new()
        .config(ManagerConfig::default().with_event_capacity(0))
        .build::<String>();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_builder_wires_sink_and_spawner() {
    let sink = InMemoryEventSink::new(32);
    let manager: AdaptiveResourceManager<String> = ManagerBuilder::new()
        .config(ManagerConfig::default().with_scheduler_interval(Duration::from_millis(10)))
        .event_sink(sink.clone())
        .spawner(TokioSpawner::current().unwrap())
        .build()
        .unwrap();

    let handle = manager
        .submit(
            Task::new(|ctx: TaskContext| async move { Ok::<_, TaskError>(ctx.task_type) })
                .with_type("summarize"),
        )
        .unwrap();
    assert_eq!(handle.await.unwrap(), "summarize");

    let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, ["queued", "started", "completed"]);
    manager.shutdown().await;
}
