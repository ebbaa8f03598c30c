//! Resource predictor.
//!
//! Estimates what a task will need before it is admitted. Task types with
//! recorded history are predicted from the mean of their most recent runs;
//! unknown types fall back to size-based heuristics. The only feedback path
//! is [`ResourcePredictor::record_actual_usage`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::priority::PriorityBand;
use super::resource_pool::ResourceRequest;
use super::task::TaskMetadata;

/// Confidence reported for heuristic estimates.
pub const HEURISTIC_CONFIDENCE: f64 = 0.3;
/// Smallest heuristic token estimate.
pub const MIN_TOKEN_ESTIMATE: u64 = 100;

const TOKENS_PER_CHAR: f64 = 0.25;
const CHAT_TOKEN_OVERHEAD: u64 = 500;
const ANALYSIS_TOKEN_OVERHEAD: u64 = 1_000;
const MAX_TOKEN_FACTOR: f64 = 10.0;
const LARGE_PAYLOAD_BYTES: usize = 100_000;
const MEDIUM_PAYLOAD_BYTES: usize = 10_000;
const HIGH_IO_DECLARED_BYTES: u64 = 10 * 1024 * 1024;
const MEDIUM_IO_DECLARED_BYTES: u64 = 1024 * 1024;
const MIN_COMPLEXITY: f64 = 1.0;
const MAX_COMPLEXITY: f64 = 5.0;

/// Predictor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Entries kept per task type; the oldest is evicted beyond this.
    pub history_limit: usize,
    /// Most recent entries averaged for a prediction.
    pub averaging_window: usize,
    /// Heuristic CPU share before scaling.
    pub default_cpu: f64,
    /// Heuristic memory in bytes before scaling.
    pub default_memory: u64,
    /// Heuristic execution time in milliseconds before scaling.
    pub default_execution_time_ms: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            averaging_window: 20,
            default_cpu: 10.0,
            default_memory: 50 * 1024 * 1024,
            default_execution_time_ms: 5_000,
        }
    }
}

impl PredictorConfig {
    /// Validate predictor settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".into());
        }
        if self.averaging_window == 0 {
            return Err("averaging_window must be greater than 0".into());
        }
        if !self.default_cpu.is_finite() || self.default_cpu < 0.0 {
            return Err("default_cpu must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Coarse I/O intensity class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoLevel {
    /// Little or no I/O.
    #[default]
    Low,
    /// Database or search style I/O.
    Medium,
    /// File or network transfer heavy.
    High,
}

/// Observed usage of one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU share used.
    pub cpu: f64,
    /// Memory used in bytes.
    pub memory: u64,
    /// Tokens consumed.
    pub tokens: u64,
    /// I/O class.
    pub io: IoLevel,
    /// Wall-clock run time.
    pub execution_time: Duration,
}

/// One recorded run in a task type's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionHistoryEntry {
    /// Observed usage.
    pub usage: ResourceUsage,
    /// When the run was recorded.
    pub recorded_at: SystemTime,
}

/// Estimated needs of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourcePrediction {
    /// CPU share.
    pub cpu: f64,
    /// Memory in bytes.
    pub memory: u64,
    /// Tokens.
    pub tokens: u64,
    /// I/O class.
    pub io: IoLevel,
    /// Expected wall-clock run time.
    pub execution_time: Duration,
    /// Certainty in `[0, 1]`, derived from history depth.
    pub confidence: f64,
    /// Complexity multiplier applied to the estimate, in `[1, 5]`.
    pub complexity: f64,
}

impl ResourcePrediction {
    /// Resources to reserve in the pool.
    #[must_use]
    pub const fn request(&self) -> ResourceRequest {
        ResourceRequest::new(self.cpu, self.memory, self.tokens)
    }
}

/// Learning resource predictor with bounded per-type history.
#[derive(Debug, Default)]
pub struct ResourcePredictor {
    config: PredictorConfig,
    history: HashMap<String, VecDeque<PredictionHistoryEntry>>,
}

impl ResourcePredictor {
    /// Create a predictor with no history.
    #[must_use]
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Estimate the resources and run time of a task.
    #[must_use]
    pub fn predict(&self, meta: &TaskMetadata) -> ResourcePrediction {
        let complexity = complexity_factor(meta);
        let io = classify_io(meta);

        match self.history.get(&meta.task_type) {
            Some(entries) if !entries.is_empty() => {
                self.predict_from_history(entries, complexity, io)
            }
            _ => self.predict_from_heuristics(meta, complexity, io),
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn predict_from_history(
        &self,
        entries: &VecDeque<PredictionHistoryEntry>,
        complexity: f64,
        io: IoLevel,
    ) -> ResourcePrediction {
        let window = self.config.averaging_window.min(entries.len());
        let recent = entries.iter().skip(entries.len() - window);

        let (mut cpu, mut memory, mut tokens, mut millis) = (0.0, 0.0, 0.0, 0.0);
        for entry in recent {
            cpu += entry.usage.cpu;
            memory += entry.usage.memory as f64;
            tokens += entry.usage.tokens as f64;
            millis += entry.usage.execution_time.as_secs_f64() * 1_000.0;
        }
        let n = window as f64;

        ResourcePrediction {
            cpu: cpu / n * complexity,
            memory: (memory / n * complexity).round() as u64,
            tokens: (tokens / n * complexity).round() as u64,
            io,
            execution_time: Duration::from_secs_f64(millis / n * complexity / 1_000.0),
            confidence: (entries.len() as f64 / self.config.averaging_window as f64).min(1.0),
            complexity,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn predict_from_heuristics(
        &self,
        meta: &TaskMetadata,
        complexity: f64,
        io: IoLevel,
    ) -> ResourcePrediction {
        let tokens = estimate_tokens(meta);
        let token_factor = (tokens as f64 / 1_000.0).min(MAX_TOKEN_FACTOR);
        let scale = complexity * token_factor;

        ResourcePrediction {
            cpu: self.config.default_cpu * scale,
            memory: (self.config.default_memory as f64 * scale).round() as u64,
            tokens,
            io,
            execution_time: Duration::from_secs_f64(
                self.config.default_execution_time_ms as f64 * scale / 1_000.0,
            ),
            confidence: HEURISTIC_CONFIDENCE,
            complexity,
        }
    }

    /// Append an observed run to a type's history, evicting the oldest entry
    /// beyond the configured limit.
    pub fn record_actual_usage(&mut self, task_type: &str, usage: ResourceUsage) {
        let entries = self.history.entry(task_type.to_string()).or_default();
        entries.push_back(PredictionHistoryEntry {
            usage,
            recorded_at: SystemTime::now(),
        });
        while entries.len() > self.config.history_limit {
            entries.pop_front();
        }
    }

    /// Number of recorded runs for a task type.
    #[must_use]
    pub fn history_len(&self, task_type: &str) -> usize {
        self.history.get(task_type).map_or(0, VecDeque::len)
    }

    /// Recorded runs for a task type, oldest first.
    #[must_use]
    pub fn history(&self, task_type: &str) -> Vec<PredictionHistoryEntry> {
        self.history
            .get(task_type)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Serialized byte length of the payload, zero when absent.
fn payload_len(meta: &TaskMetadata) -> usize {
    meta.payload
        .as_ref()
        .map_or(0, |payload| payload.to_string().len())
}

/// Multiplier reflecting how demanding a task looks, clamped to `[1, 5]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn complexity_factor(meta: &TaskMetadata) -> f64 {
    let mut factor = 1.0;

    factor += 0.2 * meta.required_capabilities.len() as f64;

    match meta.declared_band() {
        PriorityBand::High => factor += 0.5,
        PriorityBand::Critical => factor += 0.2,
        PriorityBand::Normal | PriorityBand::Low => {}
    }

    let size = payload_len(meta);
    if size > LARGE_PAYLOAD_BYTES {
        factor += 1.0;
    } else if size > MEDIUM_PAYLOAD_BYTES {
        factor += 0.3;
    }

    let task_type = meta.task_type.to_lowercase();
    if task_type.contains("llm") || task_type.contains("ai") {
        factor += 1.5;
    }
    if task_type.contains("analyze") || task_type.contains("process") {
        factor += 0.5;
    }

    factor.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
}

/// Token estimate from payload and description size, never below 100.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn estimate_tokens(meta: &TaskMetadata) -> u64 {
    let chars = payload_len(meta) + meta.description.as_ref().map_or(0, |d| d.chars().count());
    let mut tokens = (chars as f64 * TOKENS_PER_CHAR).ceil() as u64;

    let task_type = meta.task_type.to_lowercase();
    if task_type.contains("chat") {
        tokens += CHAT_TOKEN_OVERHEAD;
    }
    if task_type.contains("analy") {
        tokens += ANALYSIS_TOKEN_OVERHEAD;
    }

    tokens.max(MIN_TOKEN_ESTIMATE)
}

/// I/O class from type keywords, falling back to a declared payload `size`.
#[must_use]
pub fn classify_io(meta: &TaskMetadata) -> IoLevel {
    let task_type = meta.task_type.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| task_type.contains(w));

    if has_any(&["file", "download", "upload", "storage"]) {
        return IoLevel::High;
    }
    if has_any(&["database", "query", "search"]) {
        return IoLevel::Medium;
    }

    let declared = meta
        .payload
        .as_ref()
        .and_then(|p| p.get("size"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    if declared > HIGH_IO_DECLARED_BYTES {
        IoLevel::High
    } else if declared > MEDIUM_IO_DECLARED_BYTES {
        IoLevel::Medium
    } else {
        IoLevel::Low
    }
}
