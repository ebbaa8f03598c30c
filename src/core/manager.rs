//! Adaptive resource manager.
//!
//! The manager owns one [`PriorityQueue`] per [`PriorityBand`], the
//! [`ResourcePool`], the [`ResourcePredictor`] and the table of executing
//! tasks, all behind a single lock. Three manager-owned loops drive it:
//!
//! - the scheduling loop admits at most one task per tick and drains the
//!   completion channel that executing bodies report into,
//! - the aging loop lowers the score of every queued task,
//! - the token loop hard-resets the pool's token window.
//!
//! Task bodies never touch shared state. A body runs as its own tokio task;
//! a small wrapper awaits it and sends a completion message back to the
//! scheduling loop, which releases resources and resolves the caller's
//! [`TaskHandle`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::error::{SchedulerError, TaskError};
use super::events::{EventBus, SchedulerEvent};
use super::metrics::{BandStats, MetricsCollector, QueueStats, QueuedTaskSummary, SchedulerMetrics};
use super::predictor::{ResourcePrediction, ResourcePredictor, ResourceUsage};
use super::priority::{
    calculate_priority, clamp_score, PriorityBand, MIN_SCORE, PREEMPTIBLE_FLOOR, PREEMPTION_BOOST,
    PREEMPTOR_CEILING,
};
use super::resource_pool::{PoolSnapshot, ResourcePool, ResourceRequest, ResourceUtilization};
use super::task::{ScheduledTask, Task, TaskContext, TaskId, TaskMetadata};
use crate::config::ManagerConfig;
use crate::infra::queue::PriorityQueue;
use crate::runtime::TokioSpawner;

/// Interval at which shutdown re-checks the active table.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of the manager's loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Ticks, aging and token resets all run.
    Running,
    /// No new admissions; completions are still drained.
    Draining,
    /// Every loop exits.
    Stopped,
}

/// Result of one scheduling tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Every band was empty.
    Idle,
    /// The manager is shutting down and admits nothing.
    Draining,
    /// A task was admitted and its body started.
    Started {
        /// Admitted task.
        task_id: TaskId,
        /// Score at admission.
        priority: f64,
        /// Tasks evicted to make room, empty when none were.
        preempted: Vec<TaskId>,
    },
    /// The dequeued task did not fit and went back to its band unchanged.
    Requeued {
        /// Task that did not fit.
        task_id: TaskId,
        /// Unchanged score.
        priority: f64,
        /// Band it re-entered.
        band: PriorityBand,
    },
}

/// Result of one aging pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingReport {
    /// Queued tasks whose score dropped.
    pub aged: usize,
    /// Tasks that moved to a more urgent band.
    pub promoted: usize,
}

/// Result of [`AdaptiveResourceManager::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Whether every executing task finished within the drain timeout.
    pub drained: bool,
    /// Tasks still executing when the timeout elapsed. They keep running and
    /// their handles receive the body's result.
    pub still_active: Vec<TaskId>,
    /// Queued tasks resolved with [`SchedulerError::Cancelled`].
    pub cancelled: usize,
}

/// Where a task currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskState {
    /// Waiting in a band queue.
    Queued {
        /// Band holding the task.
        band: PriorityBand,
        /// Current score.
        priority: f64,
    },
    /// Admitted and running.
    Executing {
        /// Score at admission.
        priority: f64,
        /// Run number, 1 for the first.
        attempt: u32,
    },
}

/// Future resolving to a submitted task's result.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<R> {
    task_id: TaskId,
    band: PriorityBand,
    priority: f64,
    rx: oneshot::Receiver<Result<R, SchedulerError>>,
}

impl<R> TaskHandle<R> {
    /// Id of the submitted task.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Band the task entered at submission.
    #[must_use]
    pub const fn band(&self) -> PriorityBand {
        self.band
    }

    /// Score computed at submission.
    #[must_use]
    pub const fn priority(&self) -> f64 {
        self.priority
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = Result<R, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SchedulerError::ResultDropped(
                this.task_id.clone(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Message sent by a finished body to the scheduling loop.
struct Completion<R> {
    task_id: TaskId,
    attempt: u32,
    outcome: Result<R, TaskError>,
    elapsed: Duration,
    reported: Option<ResourceRequest>,
}

/// An admitted task.
struct ActiveTask<R> {
    task: ScheduledTask<R>,
    allocation: ResourceRequest,
    prediction: ResourcePrediction,
    started: Instant,
    abort: AbortHandle,
}

/// Everything guarded by the scheduler lock.
struct SchedulerState<R> {
    queues: [PriorityQueue<ScheduledTask<R>>; 4],
    pool: ResourcePool,
    predictor: ResourcePredictor,
    active: HashMap<TaskId, ActiveTask<R>>,
    /// Runs still executing when shutdown gave up waiting. Their results
    /// are still delivered but no longer hold pool resources.
    detached: HashMap<TaskId, ActiveTask<R>>,
    metrics: MetricsCollector,
    accepting: bool,
}

impl<R> SchedulerState<R> {
    fn contains(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id) || self.queues.iter().any(|q| q.contains(task_id))
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(PriorityQueue::len).sum()
    }

    /// Pop the best task of the most urgent non-empty band.
    fn pop_next(&mut self) -> Option<ScheduledTask<R>> {
        self.queues.iter_mut().find_map(|queue| {
            queue.dequeue().map(|entry| {
                let mut task = entry.item;
                task.meta.calculated_priority = entry.priority;
                task
            })
        })
    }

    /// Place a task in the band matching its current score.
    ///
    /// A task that cannot be placed is resolved with an internal error.
    fn enqueue(&mut self, task: ScheduledTask<R>) -> Result<PriorityBand, SchedulerError> {
        let band = task.meta.band();
        let priority = task.meta.calculated_priority;
        match self.queues[band.index()].enqueue(task, priority) {
            Ok(()) => Ok(band),
            Err(mut task) => {
                let err = SchedulerError::Internal(format!(
                    "task {} is already queued in band {band}",
                    task.meta.id
                ));
                task.respond(Err(SchedulerError::Internal(err.to_string())));
                Err(err)
            }
        }
    }

    /// Low-band executing tasks to evict so that at least `needed` CPU plus
    /// memory is freed, least urgent and most recently started first.
    /// Every candidate is returned when together they cannot free enough.
    fn select_victims(&self, needed: f64) -> Vec<TaskId> {
        let mut candidates: Vec<&ActiveTask<R>> = self
            .active
            .values()
            .filter(|a| a.task.meta.calculated_priority >= PREEMPTIBLE_FLOOR)
            .collect();
        candidates.sort_by(|a, b| {
            b.task
                .meta
                .calculated_priority
                .total_cmp(&a.task.meta.calculated_priority)
                .then_with(|| b.started.cmp(&a.started))
        });

        let mut freed = 0.0;
        let mut victims = Vec::new();
        for candidate in candidates {
            freed += candidate.allocation.footprint();
            victims.push(candidate.task.meta.id.clone());
            if freed >= needed {
                break;
            }
        }
        victims
    }
}

/// Shared core referenced by the handle and the loops.
struct Inner<R> {
    config: ManagerConfig,
    state: Mutex<SchedulerState<R>>,
    events: EventBus,
    spawner: TokioSpawner,
    completions: mpsc::UnboundedSender<Completion<R>>,
    lifecycle: watch::Sender<Lifecycle>,
}

/// Priority scheduler with predictive admission control, aging and
/// preemption.
///
/// # Example
///
/// ```rust,ignore
/// use adaptive_resource_manager::config::ManagerConfig;
/// use adaptive_resource_manager::core::{AdaptiveResourceManager, Task, TaskContext, TaskError};
///
/// let manager = AdaptiveResourceManager::new(ManagerConfig::default())?;
/// let handle = manager.submit(
///     Task::new(|ctx: TaskContext| async move { Ok::<_, TaskError>(ctx.task_id) })
///         .with_type("report")
///         .with_base_priority(30.0),
/// )?;
/// let id = handle.await?;
/// manager.shutdown().await;
/// ```
pub struct AdaptiveResourceManager<R: Send + 'static> {
    inner: Arc<Inner<R>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: Send + 'static> std::fmt::Debug for AdaptiveResourceManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveResourceManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> AdaptiveResourceManager<R> {
    /// Create a manager on the current tokio runtime and start its loops.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] when the configuration does
    /// not validate and [`SchedulerError::Runtime`] outside a tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<Self, SchedulerError> {
        let events = EventBus::new(config.event_capacity);
        Self::from_parts(config, events, TokioSpawner::current()?)
    }

    pub(crate) fn from_parts(
        config: ManagerConfig,
        events: EventBus,
        spawner: TokioSpawner,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let state = SchedulerState {
            queues: std::array::from_fn(|_| PriorityQueue::new()),
            pool: ResourcePool::new(config.limits.clone()),
            predictor: ResourcePredictor::new(config.predictor.clone()),
            active: HashMap::new(),
            detached: HashMap::new(),
            metrics: MetricsCollector::default(),
            accepting: true,
        };
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = watch::channel(Lifecycle::Running);

        info!(
            max_cpu = config.limits.max_cpu,
            max_memory = config.limits.max_memory,
            max_tokens_per_minute = config.limits.max_tokens_per_minute,
            max_concurrent_tasks = config.limits.max_concurrent_tasks,
            scheduler_interval_ms = config.scheduler_interval_ms,
            aging_interval_ms = config.aging_interval_ms,
            preemption_enabled = config.preemption_enabled,
            "adaptive resource manager started"
        );

        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(state),
            events,
            spawner,
            completions,
            lifecycle,
        });

        let loops = vec![
            inner.spawner.spawn(run_scheduler(
                Arc::clone(&inner),
                completion_rx,
                inner.lifecycle.subscribe(),
            )),
            inner
                .spawner
                .spawn(run_aging(Arc::clone(&inner), inner.lifecycle.subscribe())),
            inner
                .spawner
                .spawn(run_token_window(Arc::clone(&inner), inner.lifecycle.subscribe())),
        ];

        Ok(Self {
            inner,
            loops: Mutex::new(loops),
        })
    }

    /// Queue a task and return a handle resolving to its result.
    ///
    /// An empty id is replaced by a random UUID. The dynamic score is
    /// computed here and decides the initial band.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::ShuttingDown`] once shutdown has begun.
    /// - [`SchedulerError::DuplicateTask`] if the id is queued or executing.
    /// - [`SchedulerError::InvalidTask`] for a non-finite base priority.
    pub fn submit(&self, task: Task<R>) -> Result<TaskHandle<R>, SchedulerError> {
        let Task { mut meta, body } = task;
        if meta.id.is_empty() {
            meta.id = uuid::Uuid::new_v4().to_string();
        }
        if !meta.base_priority.is_finite() {
            return Err(SchedulerError::InvalidTask(format!(
                "base priority of {} is not a finite number",
                meta.id
            )));
        }

        let now = SystemTime::now();
        meta.submitted_at = Some(now);
        meta.calculated_priority = calculate_priority(&meta, now);

        let task_id = meta.id.clone();
        let task_type = meta.task_type.clone();
        let priority = meta.calculated_priority;
        let band = meta.band();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            if state.contains(&task_id) {
                return Err(SchedulerError::DuplicateTask(task_id));
            }
            let scheduled = ScheduledTask {
                meta,
                body,
                responder: Some(tx),
                attempts: 0,
                submitted: Instant::now(),
                first_started: None,
            };
            if state.queues[band.index()].enqueue(scheduled, priority).is_err() {
                return Err(SchedulerError::DuplicateTask(task_id));
            }
            state.metrics.enqueued();
        }

        debug!(task_id = %task_id, task_type = %task_type, priority, band = %band, "task queued");
        self.inner.events.emit(SchedulerEvent::Queued {
            task_id: task_id.clone(),
            task_type,
            priority,
            band,
            at_ms: SchedulerEvent::timestamp(),
        });

        Ok(TaskHandle {
            task_id,
            band,
            priority,
            rx,
        })
    }

    /// Run one scheduling tick now, exactly as the scheduling loop does.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Internal`] if a task could not be put back
    /// into its band; that task is resolved with the same error.
    pub fn schedule_once(&self) -> Result<TickOutcome, SchedulerError> {
        self.inner.schedule_once()
    }

    /// Run one aging pass now, exactly as the aging loop does.
    pub fn age_queued_tasks(&self) -> AgingReport {
        self.inner.age_queued_tasks()
    }

    /// Feed an observed run into the predictor's history for `task_type`.
    pub fn record_usage(&self, task_type: &str, usage: ResourceUsage) {
        self.inner
            .state
            .lock()
            .predictor
            .record_actual_usage(task_type, usage);
    }

    /// Prediction the manager would use for a task with this metadata.
    #[must_use]
    pub fn predict(&self, meta: &TaskMetadata) -> ResourcePrediction {
        self.inner.state.lock().predictor.predict(meta)
    }

    /// Where a task currently is, `None` once it has finished or if unknown.
    #[must_use]
    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        let state = self.inner.state.lock();
        if let Some(active) = state.active.get(task_id) {
            return Some(TaskState::Executing {
                priority: active.task.meta.calculated_priority,
                attempt: active.task.attempts,
            });
        }
        PriorityBand::ALL.into_iter().find_map(|band| {
            state.queues[band.index()]
                .get(task_id)
                .map(|entry| TaskState::Queued {
                    band,
                    priority: entry.priority,
                })
        })
    }

    /// Ids of executing tasks.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.state.lock().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of queued tasks across all bands.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queued()
    }

    /// Per-band size, average wait and longest-waiting task.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn queue_stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let bands = PriorityBand::ALL
            .into_iter()
            .map(|band| {
                let queue = &state.queues[band.index()];
                let mut total_wait = Duration::ZERO;
                let mut oldest: Option<(Duration, QueuedTaskSummary)> = None;
                for entry in queue.iter() {
                    let waited = entry.item.submitted.elapsed();
                    total_wait += waited;
                    if oldest.as_ref().is_none_or(|(longest, _)| waited > *longest) {
                        oldest = Some((
                            waited,
                            QueuedTaskSummary {
                                task_id: entry.item.meta.id.clone(),
                                task_type: entry.item.meta.task_type.clone(),
                                priority: entry.priority,
                                waited_ms: millis(waited),
                            },
                        ));
                    }
                }
                let average_wait_ms = if queue.is_empty() {
                    0.0
                } else {
                    total_wait.as_secs_f64() * 1_000.0 / queue.len() as f64
                };
                BandStats {
                    band,
                    size: queue.len(),
                    average_wait_ms,
                    oldest: oldest.map(|(_, summary)| summary),
                }
            })
            .collect();
        QueueStats { bands }
    }

    /// Current utilization ratios.
    #[must_use]
    pub fn utilization(&self) -> ResourceUtilization {
        self.inner.state.lock().pool.utilization()
    }

    /// Current pool counters.
    #[must_use]
    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.inner.state.lock().pool.snapshot()
    }

    /// Aggregate counters and averages.
    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.state.lock().metrics.snapshot()
    }

    /// Receive every event emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Whether the manager still accepts submissions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.lifecycle.borrow() == Lifecycle::Running
    }

    /// Stop accepting work, wait up to the configured timeout for executing
    /// tasks, then cancel everything still queued and reset the pool.
    ///
    /// Tasks still executing when the timeout elapses are reported and left
    /// running. Their handles resolve with the body's own result once it
    /// finishes. Queued tasks are resolved with [`SchedulerError::Cancelled`].
    /// Calling this again returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return ShutdownReport {
                    drained: state.active.is_empty(),
                    ..ShutdownReport::default()
                };
            }
            state.accepting = false;
        }
        self.inner.lifecycle.send_replace(Lifecycle::Draining);

        let timeout = self.inner.config.shutdown_timeout();
        info!(timeout_ms = millis(timeout), "shutdown started, draining active tasks");

        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.inner.state.lock().active.is_empty();
            if idle {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(DRAIN_POLL_INTERVAL)).await;
        }

        let mut events = Vec::new();
        let report = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let mut still_active: Vec<TaskId> = Vec::new();
            for (task_id, active) in state.active.drain() {
                let running_ms = millis(active.started.elapsed());
                warn!(
                    task_id = %task_id,
                    running_ms,
                    "task still active at shutdown timeout"
                );
                events.push(SchedulerEvent::StillActiveAtShutdown {
                    task_id: task_id.clone(),
                    running_ms,
                    at_ms: SchedulerEvent::timestamp(),
                });
                still_active.push(task_id.clone());
                state.detached.insert(task_id, active);
            }
            still_active.sort();

            let mut cancelled = 0;
            for queue in &mut state.queues {
                for mut entry in queue.drain() {
                    let task_id = entry.item.meta.id.clone();
                    entry.item.respond(Err(SchedulerError::Cancelled(task_id)));
                    cancelled += 1;
                }
            }
            state.metrics.cancelled(cancelled);
            state.pool.reset();

            ShutdownReport {
                drained: still_active.is_empty(),
                still_active,
                cancelled,
            }
        };

        for event in events {
            self.inner.events.emit(event);
        }

        // The scheduling loop hands remaining completions to a detached
        // drain once it sees `Stopped`.
        self.inner.lifecycle.send_replace(Lifecycle::Stopped);
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "manager loop ended abnormally");
            }
        }

        info!(
            drained = report.drained,
            still_active = report.still_active.len(),
            cancelled = report.cancelled,
            "shutdown complete"
        );
        self.inner.events.emit(SchedulerEvent::ShutdownCompleted {
            drained: report.drained,
            still_active: report.still_active.clone(),
            cancelled: report.cancelled,
            at_ms: SchedulerEvent::timestamp(),
        });
        report
    }
}

impl<R: Send + 'static> Drop for AdaptiveResourceManager<R> {
    fn drop(&mut self) {
        // Loops hold the shared core; stopping them lets it be freed.
        if *self.inner.lifecycle.borrow() != Lifecycle::Stopped {
            debug!("manager dropped without shutdown, stopping loops");
            self.inner.lifecycle.send_replace(Lifecycle::Stopped);
        }
    }
}

impl<R: Send + 'static> Inner<R> {
    fn schedule_once(&self) -> Result<TickOutcome, SchedulerError> {
        let mut events = Vec::new();
        let outcome = self.tick(&mut events);
        for event in events {
            self.events.emit(event);
        }
        outcome
    }

    fn tick(&self, events: &mut Vec<SchedulerEvent>) -> Result<TickOutcome, SchedulerError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.accepting {
            return Ok(TickOutcome::Draining);
        }
        let Some(task) = state.pop_next() else {
            return Ok(TickOutcome::Idle);
        };

        let prediction = state.predictor.predict(&task.meta);
        let request = prediction.request();
        if state.pool.allocate(&request) {
            return Ok(self.start(state, task, prediction, Vec::new(), events));
        }

        let priority = task.meta.calculated_priority;
        let utilization = state.pool.utilization().aggregate();
        let eligible = priority < PREEMPTOR_CEILING
            && self.config.preemption_enabled
            && utilization >= self.config.preemption_threshold;

        if eligible {
            let victims = state.select_victims(request.footprint());
            if victims.is_empty() {
                debug!(task_id = %task.meta.id, "no preemptible tasks to evict");
            } else {
                warn!(
                    task_id = %task.meta.id,
                    priority,
                    utilization,
                    victims = victims.len(),
                    "preempting low priority tasks"
                );
                for victim in &victims {
                    self.preempt(state, victim, &task.meta.id, events)?;
                }
                if state.pool.allocate(&request) {
                    return Ok(self.start(state, task, prediction, victims, events));
                }
            }
        }

        self.requeue(state, task, request, events)
    }

    /// Spawn the body of an admitted task and record it as active.
    fn start(
        &self,
        state: &mut SchedulerState<R>,
        mut task: ScheduledTask<R>,
        prediction: ResourcePrediction,
        preempted: Vec<TaskId>,
        events: &mut Vec<SchedulerEvent>,
    ) -> TickOutcome {
        task.attempts += 1;
        let waited = task.submitted.elapsed();
        let first_start = task.first_started.is_none();
        if first_start {
            task.first_started = Some(Instant::now());
        }
        state.metrics.started(first_start.then_some(waited));

        let task_id = task.meta.id.clone();
        let priority = task.meta.calculated_priority;
        let allocation = prediction.request();
        let attempt = task.attempts;
        let ctx = TaskContext::new(
            task_id.clone(),
            task.meta.task_type.clone(),
            priority,
            allocation,
            attempt,
        );
        let abort = self.spawn_body(&task, ctx);

        info!(
            task_id = %task_id,
            priority,
            cpu = allocation.cpu,
            memory = allocation.memory,
            tokens = allocation.tokens,
            confidence = prediction.confidence,
            attempt,
            "task admitted"
        );
        events.push(SchedulerEvent::Started {
            task_id: task_id.clone(),
            priority,
            allocation,
            confidence: prediction.confidence,
            waited_ms: millis(waited),
            attempt,
            at_ms: SchedulerEvent::timestamp(),
        });

        state.active.insert(
            task_id.clone(),
            ActiveTask {
                task,
                allocation,
                prediction,
                started: Instant::now(),
                abort,
            },
        );

        TickOutcome::Started {
            task_id,
            priority,
            preempted,
        }
    }

    /// Run the body as its own task so it can be aborted, and report its
    /// outcome through the completion channel.
    fn spawn_body(&self, task: &ScheduledTask<R>, ctx: TaskContext) -> AbortHandle {
        let body = Arc::clone(&task.body);
        let usage = ctx.clone();
        let started = Instant::now();
        let run = self.spawner.spawn(async move { body.run(ctx).await });
        let abort = run.abort_handle();

        let completions = self.completions.clone();
        let task_id = usage.task_id.clone();
        let attempt = usage.attempt;
        self.spawner.spawn(async move {
            let outcome = match run.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => {
                    debug!(task_id = %task_id, attempt, "run aborted");
                    return;
                }
                Err(e) => Err(TaskError::Panicked(panic_message(e))),
            };
            let done = Completion {
                task_id,
                attempt,
                outcome,
                elapsed: started.elapsed(),
                reported: usage.reported_usage(),
            };
            // Closed only once the manager is gone.
            let _ = completions.send(done);
        });
        abort
    }

    /// Evict an executing task back into the queues with a boosted score.
    fn preempt(
        &self,
        state: &mut SchedulerState<R>,
        victim: &str,
        preempted_by: &str,
        events: &mut Vec<SchedulerEvent>,
    ) -> Result<(), SchedulerError> {
        let Some(active) = state.active.remove(victim) else {
            return Ok(());
        };
        active.abort.abort();
        state.pool.release(&active.allocation);
        state.metrics.preempted();

        let mut task = active.task;
        let new_priority = clamp_score(task.meta.calculated_priority - PREEMPTION_BOOST);
        task.meta.calculated_priority = new_priority;
        let band = state.enqueue(task)?;

        warn!(
            task_id = %victim,
            preempted_by = %preempted_by,
            new_priority,
            band = %band,
            "task preempted"
        );
        events.push(SchedulerEvent::Preempted {
            task_id: victim.to_string(),
            preempted_by: preempted_by.to_string(),
            new_priority,
            band,
            freed: active.allocation,
            at_ms: SchedulerEvent::timestamp(),
        });
        Ok(())
    }

    /// Put a task that did not fit back into its band unchanged.
    fn requeue(
        &self,
        state: &mut SchedulerState<R>,
        task: ScheduledTask<R>,
        requested: ResourceRequest,
        events: &mut Vec<SchedulerEvent>,
    ) -> Result<TickOutcome, SchedulerError> {
        let task_id = task.meta.id.clone();
        let priority = task.meta.calculated_priority;
        let band = state.enqueue(task)?;
        state.metrics.requeued();

        debug!(
            task_id = %task_id,
            priority,
            band = %band,
            available_cpu = state.pool.available_cpu(),
            available_memory = state.pool.available_memory(),
            "task does not fit, requeued"
        );
        events.push(SchedulerEvent::Requeued {
            task_id: task_id.clone(),
            priority,
            band,
            requested,
            at_ms: SchedulerEvent::timestamp(),
        });

        Ok(TickOutcome::Requeued {
            task_id,
            priority,
            band,
        })
    }

    /// Apply a finished run reported by a body wrapper.
    fn complete(&self, done: Completion<R>) {
        let event = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let is_current = |a: &ActiveTask<R>| a.task.attempts == done.attempt;
            let mut active = if state.active.get(&done.task_id).is_some_and(is_current) {
                let Some(active) = state.active.remove(&done.task_id) else {
                    return;
                };
                state.pool.release(&active.allocation);
                active
            } else if state.detached.get(&done.task_id).is_some_and(is_current) {
                // The pool was reset at shutdown, nothing to release.
                let Some(active) = state.detached.remove(&done.task_id) else {
                    return;
                };
                active
            } else {
                debug!(task_id = %done.task_id, attempt = done.attempt, "stale completion ignored");
                return;
            };
            let execution_ms = millis(done.elapsed);

            match done.outcome {
                Ok(value) => {
                    let used = done
                        .reported
                        .unwrap_or_else(|| baseline_usage(&active.prediction));
                    state.predictor.record_actual_usage(
                        &active.task.meta.task_type,
                        ResourceUsage {
                            cpu: used.cpu,
                            memory: used.memory,
                            tokens: used.tokens,
                            io: active.prediction.io,
                            execution_time: done.elapsed,
                        },
                    );
                    state.metrics.completed(done.elapsed);
                    info!(task_id = %done.task_id, execution_ms, "task completed");
                    active.task.respond(Ok(value));
                    SchedulerEvent::Completed {
                        task_id: done.task_id,
                        execution_ms,
                        released: active.allocation,
                        at_ms: SchedulerEvent::timestamp(),
                    }
                }
                Err(source) => {
                    state.metrics.failed(done.elapsed);
                    let error = source.to_string();
                    warn!(task_id = %done.task_id, execution_ms, error = %error, "task failed");
                    active.task.respond(Err(SchedulerError::TaskFailed {
                        task_id: done.task_id.clone(),
                        source,
                    }));
                    SchedulerEvent::Failed {
                        task_id: done.task_id,
                        error,
                        execution_ms,
                        at_ms: SchedulerEvent::timestamp(),
                    }
                }
            }
        };
        self.events.emit(event);
    }

    fn age_queued_tasks(&self) -> AgingReport {
        let step = self.config.aging_step;
        let mut report = AgingReport::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            // Scores only fall, so a moved task lands in a band already visited.
            for band in PriorityBand::ALL {
                let scores: Vec<(TaskId, f64)> = state.queues[band.index()]
                    .iter()
                    .map(|entry| (entry.item.meta.id.clone(), entry.priority))
                    .collect();

                for (task_id, old) in scores {
                    let new = (old - step).max(MIN_SCORE);
                    if new >= old {
                        continue;
                    }
                    report.aged += 1;

                    let target = PriorityBand::from_score(new);
                    if target == band {
                        state.queues[band.index()].update_priority(&task_id, new);
                        continue;
                    }
                    if let Some(entry) = state.queues[band.index()].remove(&task_id) {
                        let mut task = entry.item;
                        task.meta.calculated_priority = new;
                        if let Err(e) = state.enqueue(task) {
                            error!(task_id = %task_id, error = %e, "aging could not move task");
                            continue;
                        }
                        report.promoted += 1;
                        debug!(task_id = %task_id, from = %band, to = %target, priority = new, "task promoted by aging");
                    }
                }
            }
            state.metrics.aged(report.promoted);
        }

        if report.aged > 0 {
            debug!(aged = report.aged, promoted = report.promoted, "aging pass complete");
        }
        self.events.emit(SchedulerEvent::AgingCompleted {
            aged: report.aged,
            promoted: report.promoted,
            at_ms: SchedulerEvent::timestamp(),
        });
        report
    }

    fn reset_token_window(&self) {
        self.state.lock().pool.reset_token_window();
    }
}

/// What to feed back to the predictor when the body reported nothing: the
/// prediction without its complexity multiplier, so repeated runs of a type
/// do not compound the multiplier.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn baseline_usage(prediction: &ResourcePrediction) -> ResourceRequest {
    let factor = prediction.complexity.max(1.0);
    ResourceRequest::new(
        prediction.cpu / factor,
        (prediction.memory as f64 / factor).round() as u64,
        (prediction.tokens as f64 / factor).round() as u64,
    )
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run_scheduler<R: Send + 'static>(
    inner: Arc<Inner<R>>,
    mut completions: mpsc::UnboundedReceiver<Completion<R>>,
    mut lifecycle: watch::Receiver<Lifecycle>,
) {
    let mut ticks = ticker(inner.config.scheduler_interval());
    debug!("scheduling loop started");
    loop {
        let running = *lifecycle.borrow() == Lifecycle::Running;
        tokio::select! {
            Some(done) = completions.recv() => inner.complete(done),
            _ = ticks.tick(), if running => {
                if let Err(e) = inner.schedule_once() {
                    error!(error = %e, "scheduling tick failed");
                }
            }
            changed = lifecycle.changed() => {
                if changed.is_err() || *lifecycle.borrow() == Lifecycle::Stopped {
                    break;
                }
            }
        }
    }
    debug!("scheduling loop stopped");

    let stragglers = inner.state.lock().detached.len();
    if stragglers > 0 {
        debug!(stragglers, "delivering results of tasks left running at shutdown");
        let spawner = inner.spawner.clone();
        spawner.spawn(drain_detached(inner, completions));
    }
}

/// Deliver completions of runs left executing at shutdown, then exit.
async fn drain_detached<R: Send + 'static>(
    inner: Arc<Inner<R>>,
    mut completions: mpsc::UnboundedReceiver<Completion<R>>,
) {
    while let Some(done) = completions.recv().await {
        inner.complete(done);
        let remaining = inner.state.lock().detached.len();
        if remaining == 0 {
            break;
        }
    }
    debug!("detached task results delivered");
}

async fn run_aging<R: Send + 'static>(inner: Arc<Inner<R>>, mut lifecycle: watch::Receiver<Lifecycle>) {
    let mut ticks = ticker(inner.config.aging_interval());
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                inner.age_queued_tasks();
            }
            changed = lifecycle.changed() => {
                if changed.is_err() || *lifecycle.borrow() != Lifecycle::Running {
                    break;
                }
            }
        }
    }
    debug!("aging loop stopped");
}

async fn run_token_window<R: Send + 'static>(
    inner: Arc<Inner<R>>,
    mut lifecycle: watch::Receiver<Lifecycle>,
) {
    let mut ticks = ticker(inner.config.token_window());
    loop {
        tokio::select! {
            _ = ticks.tick() => inner.reset_token_window(),
            changed = lifecycle.changed() => {
                if changed.is_err() || *lifecycle.borrow() != Lifecycle::Running {
                    break;
                }
            }
        }
    }
    debug!("token window loop stopped");
}
