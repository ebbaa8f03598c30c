//! Scheduler event notifications.
//!
//! Every state transition emits a [`SchedulerEvent`]. Events are recorded into
//! any attached [`EventSink`]s and fanned out to `tokio::sync::broadcast`
//! subscribers. Emission never blocks and never fails: with no subscribers the
//! broadcast copy is simply dropped, and slow subscribers lose the oldest
//! events.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use super::priority::PriorityBand;
use super::resource_pool::ResourceRequest;
use super::task::TaskId;
use crate::util::clock::now_ms;

/// Default broadcast buffer (events).
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// A scheduler state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Task accepted into a band queue.
    Queued {
        /// Task.
        task_id: TaskId,
        /// Type tag.
        task_type: String,
        /// Score at submission.
        priority: f64,
        /// Band entered.
        band: PriorityBand,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Task admitted and its body started.
    Started {
        /// Task.
        task_id: TaskId,
        /// Score at admission.
        priority: f64,
        /// Resources reserved.
        allocation: ResourceRequest,
        /// Predictor confidence for the reservation.
        confidence: f64,
        /// Time spent queued since submission.
        waited_ms: u64,
        /// 1 for the first run.
        attempt: u32,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Task body returned successfully.
    Completed {
        /// Task.
        task_id: TaskId,
        /// Duration of the final run.
        execution_ms: u64,
        /// Resources released.
        released: ResourceRequest,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Task body returned an error or panicked.
    Failed {
        /// Task.
        task_id: TaskId,
        /// Rendered error.
        error: String,
        /// Duration of the failed run.
        execution_ms: u64,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Executing task evicted to make room for a more urgent one.
    Preempted {
        /// Evicted task.
        task_id: TaskId,
        /// Task the room was made for.
        preempted_by: TaskId,
        /// Boosted score.
        new_priority: f64,
        /// Band the evicted task re-entered.
        band: PriorityBand,
        /// Resources released by the eviction.
        freed: ResourceRequest,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Task could not be admitted and went back to its band unchanged.
    Requeued {
        /// Task.
        task_id: TaskId,
        /// Unchanged score.
        priority: f64,
        /// Band re-entered.
        band: PriorityBand,
        /// Resources that did not fit.
        requested: ResourceRequest,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// One aging pass finished.
    AgingCompleted {
        /// Queued tasks whose score changed.
        aged: usize,
        /// Tasks that moved to a more urgent band.
        promoted: usize,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Task still executing when the shutdown timeout elapsed. Its body keeps
    /// running and its handle still receives the body's result.
    StillActiveAtShutdown {
        /// Task.
        task_id: TaskId,
        /// Time the current run had been executing.
        running_ms: u64,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
    /// Shutdown finished.
    ShutdownCompleted {
        /// Whether every executing task finished before the timeout.
        drained: bool,
        /// Tasks still executing when the timeout elapsed.
        still_active: Vec<TaskId>,
        /// Queued tasks cancelled.
        cancelled: usize,
        /// Milliseconds since the epoch.
        at_ms: u128,
    },
}

impl SchedulerEvent {
    /// Stable event name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Preempted { .. } => "preempted",
            Self::Requeued { .. } => "requeued",
            Self::AgingCompleted { .. } => "aging_completed",
            Self::StillActiveAtShutdown { .. } => "still_active_at_shutdown",
            Self::ShutdownCompleted { .. } => "shutdown_completed",
        }
    }

    /// Task the event concerns, if it concerns one.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Queued { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Preempted { task_id, .. }
            | Self::Requeued { task_id, .. }
            | Self::StillActiveAtShutdown { task_id, .. } => Some(task_id),
            Self::AgingCompleted { .. } | Self::ShutdownCompleted { .. } => None,
        }
    }

    pub(crate) fn timestamp() -> u128 {
        now_ms()
    }
}

/// Destination for scheduler events.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: &SchedulerEvent);
}

/// In-memory event sink with a bounded buffer. Clones share the buffer.
#[derive(Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<VecDeque<SchedulerEvent>>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink keeping at most `max_events`, dropping the oldest.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1_024)))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events of one kind.
    #[must_use]
    pub fn events_of(&self, kind: &str) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: &SchedulerEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Sink that writes every event to `tracing` at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: &SchedulerEvent) {
        let body = serde_json::to_string(event).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        tracing::info!(kind = event.kind(), task_id = event.task_id(), %body, "scheduler event");
    }
}

/// Fan-out point for scheduler events.
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventBus {
    /// Create a bus with the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sinks: Vec::new(),
        }
    }

    /// Attach a sink.
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Record an event in every sink and broadcast it.
    pub fn emit(&self, event: SchedulerEvent) {
        tracing::trace!(kind = event.kind(), task_id = event.task_id(), "emit");
        for sink in &self.sinks {
            sink.record(&event);
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Receive events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
