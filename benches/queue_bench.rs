//! Benchmarks for the adaptive resource manager.
//!
//! Benchmarks cover:
//! - Band queue operations (enqueue/dequeue, reprioritization, removal)
//! - ResourcePool admission and release
//! - Predictor estimates from history and heuristics
//! - Submission plus scheduling ticks through the manager

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use adaptive_resource_manager::config::ManagerConfig;
use adaptive_resource_manager::core::{
    AdaptiveResourceManager, IoLevel, PoolLimits, PredictorConfig, ResourcePool,
    ResourcePredictor, ResourceRequest, ResourceUsage, Task, TaskContext, TaskError,
    TaskMetadata,
};
use adaptive_resource_manager::infra::{Keyed, PriorityQueue};
use tokio::runtime::Runtime;

// ============================================================================
// Helpers
// ============================================================================

struct BenchItem(String);

impl Keyed for BenchItem {
    fn key(&self) -> &str {
        &self.0
    }
}

/// Deterministic spread of scores over `[0, 99]`.
fn score(i: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let s = (i.wrapping_mul(2_654_435_761) % 100) as f64;
    s
}

fn filled_queue(size: u64) -> PriorityQueue<BenchItem> {
    let mut q = PriorityQueue::new();
    for i in 0..size {
        let _ = q.enqueue(BenchItem(format!("task-{i}")), score(i));
    }
    q
}

fn meta(task_type: &str) -> TaskMetadata {
    TaskMetadata {
        task_type: task_type.to_string(),
        description: Some("summarize the attached quarterly report".repeat(20)),
        ..TaskMetadata::default()
    }
}

async fn noop(ctx: TaskContext) -> Result<String, TaskError> {
    Ok(ctx.task_id)
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue_dequeue");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = filled_queue(size);
                while let Some(entry) = q.dequeue() {
                    black_box(entry);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_update_priority(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_update_priority");

    for size in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut q = filled_queue(size);
            let mut i = 0_u64;
            b.iter(|| {
                let key = format!("task-{}", i % size);
                black_box(q.update_priority(&key, score(i + 7)));
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_queue_remove_reinsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_remove_reinsert");

    for size in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut q = filled_queue(size);
            let mut i = 0_u64;
            b.iter(|| {
                let key = format!("task-{}", i % size);
                if let Some(entry) = q.remove(&key) {
                    let _ = q.enqueue(entry.item, entry.priority);
                }
                i += 1;
            });
        });
    }
    group.finish();
}

// ============================================================================
// Pool and Predictor Benchmarks
// ============================================================================

fn bench_pool_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_allocate_release");

    group.bench_function("fill_and_drain", |b| {
        let request = ResourceRequest::new(5.0, 64 * 1024 * 1024, 100);
        b.iter(|| {
            let mut pool = ResourcePool::new(PoolLimits::default());
            let mut held = 0;
            while pool.allocate(black_box(&request)) {
                held += 1;
            }
            for _ in 0..held {
                pool.release(&request);
            }
            black_box(pool.utilization());
        });
    });
    group.finish();
}

fn bench_predictor(c: &mut Criterion) {
    let mut group = c.benchmark_group("predictor");

    let mut predictor = ResourcePredictor::new(PredictorConfig::default());
    for i in 0..100_u32 {
        predictor.record_actual_usage(
            "report",
            ResourceUsage {
                cpu: f64::from(i % 30),
                memory: u64::from(i) * 1_024,
                tokens: u64::from(i) * 10,
                io: IoLevel::Low,
                execution_time: Duration::from_millis(u64::from(i)),
            },
        );
    }

    let known = meta("report");
    let unknown = meta("llm-chat-analysis");
    group.bench_function("from_history", |b| {
        b.iter(|| black_box(predictor.predict(black_box(&known))));
    });
    group.bench_function("from_heuristics", |b| {
        b.iter(|| black_box(predictor.predict(black_box(&unknown))));
    });
    group.finish();
}

// ============================================================================
// Manager Benchmarks
// ============================================================================

fn bench_manager_submit_and_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager_submit_and_tick");

    for task_count in [10_u64, 100] {
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.to_async(Runtime::new().unwrap()).iter(|| async move {
                    let config = ManagerConfig::default()
                        .with_scheduler_interval(Duration::from_secs(3_600))
                        .with_limits(PoolLimits {
                            max_cpu: 10_000.0,
                            max_concurrent_tasks: 1_000,
                            ..PoolLimits::default()
                        });
                    let manager = AdaptiveResourceManager::new(config).unwrap();

                    let mut handles = Vec::new();
                    for i in 0..task_count {
                        let task = Task::new(noop).with_base_priority(score(i));
                        handles.push(manager.submit(task).unwrap());
                    }
                    for _ in 0..task_count {
                        black_box(manager.schedule_once().unwrap());
                    }
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                    manager.shutdown().await;
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_enqueue_dequeue,
    bench_queue_update_priority,
    bench_queue_remove_reinsert
);

criterion_group!(model_benches, bench_pool_allocate_release, bench_predictor);

criterion_group!(manager_benches, bench_manager_submit_and_tick);

criterion_main!(queue_benches, model_benches, manager_benches);
