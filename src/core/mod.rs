//! Core scheduling abstractions and capacity accounting.

pub mod error;
pub mod events;
pub mod executor;
pub mod manager;
pub mod metrics;
pub mod predictor;
pub mod priority;
pub mod resource_pool;
pub mod task;

pub use error::{AppResult, SchedulerError, TaskError};
pub use events::{EventBus, EventSink, InMemoryEventSink, SchedulerEvent, TracingEventSink};
pub use executor::TaskBody;
pub use manager::{
    AdaptiveResourceManager, AgingReport, ShutdownReport, TaskHandle, TaskState, TickOutcome,
};
pub use metrics::{BandStats, QueueStats, QueuedTaskSummary, SchedulerMetrics};
pub use predictor::{
    IoLevel, PredictionHistoryEntry, PredictorConfig, ResourcePrediction, ResourcePredictor,
    ResourceUsage,
};
pub use priority::{calculate_priority, PriorityBand};
pub use resource_pool::{
    PoolLimits, PoolSnapshot, ResourcePool, ResourceRequest, ResourceUtilization,
};
pub use task::{Task, TaskContext, TaskId, TaskMetadata};
