//! Integration tests for preemption of Low-band tasks under pressure.
//!
//! Two Low-band batch tasks fill most of a small pool. An urgent High-band
//! task that does not fit evicts both, is admitted in the same tick, and the
//! evicted tasks are re-run from the start once room frees up.

use std::collections::HashMap;
use std::time::Duration;

use adaptive_resource_manager::builders::ManagerBuilder;
use adaptive_resource_manager::config::ManagerConfig;
use adaptive_resource_manager::core::{
    AdaptiveResourceManager, InMemoryEventSink, IoLevel, PoolLimits, PriorityBand,
    ResourceUsage, SchedulerEvent, Task, TaskContext, TaskError, TaskHandle, TaskState,
    TickOutcome,
};
use adaptive_resource_manager::util::init_test_tracing;

fn small_pool_config(preemption: bool) -> ManagerConfig {
    ManagerConfig::default()
        .with_scheduler_interval(Duration::from_secs(3_600))
        .with_aging(Duration::from_secs(3_600), 1.0)
        .with_shutdown_timeout(Duration::from_millis(100))
        .with_preemption(preemption, 0.5)
        .with_limits(PoolLimits {
            max_cpu: 100.0,
            max_memory: 1_000,
            max_tokens_per_minute: 1_000_000,
            max_concurrent_tasks: 10,
        })
}

fn observed(cpu: f64, memory: u64) -> ResourceUsage {
    ResourceUsage {
        cpu,
        memory,
        tokens: 0,
        io: IoLevel::Low,
        execution_time: Duration::from_millis(10),
    }
}

/// Body that never finishes its first run and returns its attempt number on
/// any later run.
async fn restartable(ctx: TaskContext) -> Result<u32, TaskError> {
    if ctx.attempt == 1 {
        std::future::pending::<()>().await;
    }
    Ok(ctx.attempt)
}

fn build(preemption: bool) -> (AdaptiveResourceManager<u32>, InMemoryEventSink) {
    let sink = InMemoryEventSink::new(256);
    let manager = ManagerBuilder::new()
        .config(small_pool_config(preemption))
        .event_sink(sink.clone())
        .build()
        .unwrap();
    manager.record_usage("batch", observed(40.0, 400));
    manager.record_usage("urgent", observed(40.0, 400));
    (manager, sink)
}

fn fill_with_batch(manager: &AdaptiveResourceManager<u32>) -> HashMap<String, TaskHandle<u32>> {
    let mut handles = HashMap::new();
    for id in ["low-1", "low-2"] {
        let handle = manager
            .submit(
                Task::new(restartable)
                    .with_id(id)
                    .with_type("batch")
                    .with_base_priority(90.0),
            )
            .unwrap();
        assert_eq!(handle.band(), PriorityBand::Low);
        handles.insert(id.to_string(), handle);
        assert!(matches!(
            manager.schedule_once().unwrap(),
            TickOutcome::Started { .. }
        ));
    }
    handles
}

#[tokio::test]
async fn test_urgent_task_preempts_low_band_tasks() {
    init_test_tracing();
    let (manager, sink) = build(true);
    let mut handles = fill_with_batch(&manager);

    let utilization = manager.utilization();
    assert!((utilization.cpu - 0.8).abs() < 1e-9);
    assert!((utilization.aggregate() - 0.6).abs() < 1e-9);

    // 40 cpu / 400 bytes of history times the High-band complexity of 1.5.
    let urgent = manager
        .submit(
            Task::new(restartable)
                .with_id("urgent")
                .with_type("urgent")
                .with_base_priority(30.0),
        )
        .unwrap();
    assert_eq!(urgent.band(), PriorityBand::High);

    let TickOutcome::Started {
        task_id,
        mut preempted,
        ..
    } = manager.schedule_once().unwrap()
    else {
        panic!("urgent task was not admitted");
    };
    assert_eq!(task_id, "urgent");
    preempted.sort();
    assert_eq!(preempted, ["low-1", "low-2"]);

    for id in ["low-1", "low-2"] {
        assert_eq!(
            manager.task_state(id),
            Some(TaskState::Queued {
                band: PriorityBand::Low,
                priority: 80.0
            })
        );
    }
    assert!(matches!(
        manager.task_state("urgent"),
        Some(TaskState::Executing { attempt: 1, .. })
    ));
    assert_eq!(manager.active_tasks(), ["urgent"]);
    assert_eq!(manager.metrics().tasks_preempted, 2);

    let preempted_events = sink.events_of("preempted");
    assert_eq!(preempted_events.len(), 2);
    for event in preempted_events {
        let SchedulerEvent::Preempted {
            preempted_by,
            new_priority,
            freed,
            ..
        } = event
        else {
            unreachable!();
        };
        assert_eq!(preempted_by, "urgent");
        assert!((new_priority - 80.0).abs() < f64::EPSILON);
        assert!((freed.cpu - 40.0).abs() < 1e-9);
    }

    // 40 cpu remains beside the urgent task: exactly one evicted task fits
    // and runs again from the start.
    let TickOutcome::Started { task_id: rerun, .. } = manager.schedule_once().unwrap() else {
        panic!("evicted task was not re-admitted");
    };
    assert_eq!(handles.remove(&rerun).unwrap().await.unwrap(), 2);

    let report = manager.shutdown().await;
    assert!(!report.drained);
    assert_eq!(report.still_active, ["urgent"]);
    assert_eq!(report.cancelled, 1);
}

#[tokio::test]
async fn test_no_preemption_when_disabled() {
    let (manager, sink) = build(false);
    let _handles = fill_with_batch(&manager);

    manager
        .submit(
            Task::new(restartable)
                .with_id("urgent")
                .with_type("urgent")
                .with_base_priority(30.0),
        )
        .unwrap();

    assert_eq!(
        manager.schedule_once().unwrap(),
        TickOutcome::Requeued {
            task_id: "urgent".into(),
            priority: 30.0,
            band: PriorityBand::High,
        }
    );
    assert_eq!(manager.active_tasks(), ["low-1", "low-2"]);
    assert!(sink.events_of("preempted").is_empty());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_normal_band_task_never_preempts() {
    let (manager, _sink) = build(true);
    let _handles = fill_with_batch(&manager);

    manager
        .submit(
            Task::new(restartable)
                .with_id("normal")
                .with_type("urgent")
                .with_base_priority(50.0),
        )
        .unwrap();

    assert!(matches!(
        manager.schedule_once().unwrap(),
        TickOutcome::Requeued { .. }
    ));
    assert_eq!(manager.metrics().tasks_preempted, 0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_all_low_tasks_evicted_when_coverage_falls_short() {
    let (manager, sink) = build(true);
    manager.record_usage("huge", observed(60.0, 600));

    let _low = manager
        .submit(
            Task::new(restartable)
                .with_id("low")
                .with_type("batch")
                .with_base_priority(90.0),
        )
        .unwrap();
    let _normal = manager
        .submit(
            Task::new(restartable)
                .with_id("normal")
                .with_type("batch")
                .with_base_priority(60.0),
        )
        .unwrap();
    for _ in 0..2 {
        assert!(matches!(
            manager.schedule_once().unwrap(),
            TickOutcome::Started { .. }
        ));
    }
    assert!((manager.utilization().aggregate() - 0.6).abs() < 1e-9);

    // Needs 90 cpu / 900 bytes; evicting the only Low task leaves 60 / 600.
    manager
        .submit(
            Task::new(restartable)
                .with_id("huge")
                .with_type("huge")
                .with_base_priority(30.0),
        )
        .unwrap();

    assert_eq!(
        manager.schedule_once().unwrap(),
        TickOutcome::Requeued {
            task_id: "huge".into(),
            priority: 30.0,
            band: PriorityBand::High,
        }
    );
    assert_eq!(manager.active_tasks(), ["normal"]);
    assert_eq!(
        manager.task_state("low"),
        Some(TaskState::Queued {
            band: PriorityBand::Low,
            priority: 80.0
        })
    );
    let preempted = sink.events_of("preempted");
    assert_eq!(preempted.len(), 1);
    assert_eq!(preempted[0].task_id(), Some("low"));
    assert_eq!(manager.metrics().tasks_preempted, 1);
    manager.shutdown().await;
}
