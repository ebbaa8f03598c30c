//! Aggregate scheduler metrics and queue statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::priority::PriorityBand;
use super::task::TaskId;

/// Aggregate counters and averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Tasks accepted by `submit`.
    pub tasks_enqueued: u64,
    /// Body starts, including re-runs after preemption.
    pub tasks_started: u64,
    /// Tasks whose body returned successfully.
    pub tasks_completed: u64,
    /// Tasks whose body failed or panicked.
    pub tasks_failed: u64,
    /// Preemption evictions.
    pub tasks_preempted: u64,
    /// Admission failures that sent a task back to its band.
    pub tasks_requeued: u64,
    /// Tasks cancelled at shutdown while still queued.
    pub tasks_cancelled: u64,
    /// Aging passes run.
    pub aging_passes: u64,
    /// Band promotions caused by aging.
    pub tasks_promoted: u64,
    /// Mean time from submission to first start.
    pub average_wait_ms: f64,
    /// Mean duration of finished runs.
    pub average_execution_ms: f64,
}

/// Accumulates metrics. Lives inside the scheduler lock.
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    metrics: SchedulerMetrics,
    total_wait: Duration,
    waits: u64,
    total_execution: Duration,
    executions: u64,
}

impl MetricsCollector {
    pub fn enqueued(&mut self) {
        self.metrics.tasks_enqueued += 1;
    }

    /// `wait` is `Some` only for a task's first start.
    pub fn started(&mut self, wait: Option<Duration>) {
        self.metrics.tasks_started += 1;
        if let Some(wait) = wait {
            self.total_wait += wait;
            self.waits += 1;
        }
    }

    pub fn completed(&mut self, execution: Duration) {
        self.metrics.tasks_completed += 1;
        self.record_execution(execution);
    }

    pub fn failed(&mut self, execution: Duration) {
        self.metrics.tasks_failed += 1;
        self.record_execution(execution);
    }

    pub fn preempted(&mut self) {
        self.metrics.tasks_preempted += 1;
    }

    pub fn requeued(&mut self) {
        self.metrics.tasks_requeued += 1;
    }

    pub fn cancelled(&mut self, count: usize) {
        self.metrics.tasks_cancelled += count as u64;
    }

    pub fn aged(&mut self, promoted: usize) {
        self.metrics.aging_passes += 1;
        self.metrics.tasks_promoted += promoted as u64;
    }

    fn record_execution(&mut self, execution: Duration) {
        self.total_execution += execution;
        self.executions += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> SchedulerMetrics {
        let mean_ms = |total: Duration, n: u64| {
            if n == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1_000.0 / n as f64
            }
        };
        SchedulerMetrics {
            average_wait_ms: mean_ms(self.total_wait, self.waits),
            average_execution_ms: mean_ms(self.total_execution, self.executions),
            ..self.metrics.clone()
        }
    }
}

/// Descriptor of the longest-waiting task in a band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTaskSummary {
    /// Task.
    pub task_id: TaskId,
    /// Type tag.
    pub task_type: String,
    /// Current score.
    pub priority: f64,
    /// Time since submission.
    pub waited_ms: u64,
}

/// Statistics for one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    /// Band described.
    pub band: PriorityBand,
    /// Queued tasks.
    pub size: usize,
    /// Mean time since submission of queued tasks.
    pub average_wait_ms: f64,
    /// Longest-waiting queued task.
    pub oldest: Option<QueuedTaskSummary>,
}

/// Statistics for all bands, in service order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// One entry per band.
    pub bands: Vec<BandStats>,
}

impl QueueStats {
    /// Statistics of one band.
    #[must_use]
    pub fn band(&self, band: PriorityBand) -> Option<&BandStats> {
        self.bands.iter().find(|b| b.band == band)
    }

    /// Total queued tasks.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bands.iter().map(|b| b.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_use_first_start_only() {
        let mut collector = MetricsCollector::default();
        collector.started(Some(Duration::from_millis(100)));
        collector.started(Some(Duration::from_millis(300)));
        collector.started(None);
        collector.completed(Duration::from_millis(50));
        collector.failed(Duration::from_millis(150));

        let m = collector.snapshot();
        assert_eq!(m.tasks_started, 3);
        assert_eq!(m.tasks_completed, 1);
        assert_eq!(m.tasks_failed, 1);
        assert!((m.average_wait_ms - 200.0).abs() < 1e-6);
        assert!((m.average_execution_ms - 100.0).abs() < 1e-6);
    }

    #[test]
    fn empty_collector_reports_zero_averages() {
        let m = MetricsCollector::default().snapshot();
        assert_eq!(m, SchedulerMetrics::default());
    }
}
