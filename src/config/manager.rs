//! Manager configuration.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::events::DEFAULT_EVENT_CAPACITY;
use crate::core::predictor::PredictorConfig;
use crate::core::resource_pool::PoolLimits;

/// Prefix of environment variables read by [`ManagerConfig::from_env`].
pub const ENV_PREFIX: &str = "ARM_";

/// Root configuration of an adaptive resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Resource pool maxima.
    pub limits: PoolLimits,
    /// Predictor tuning.
    pub predictor: PredictorConfig,
    /// Scheduling tick period in milliseconds.
    pub scheduler_interval_ms: u64,
    /// Aging pass period in milliseconds.
    pub aging_interval_ms: u64,
    /// Score reduction applied to every queued task per aging pass.
    pub aging_step: f64,
    /// Token budget window in milliseconds.
    pub token_window_ms: u64,
    /// Whether urgent tasks may evict Low-band tasks.
    pub preemption_enabled: bool,
    /// Aggregate utilization at or above which preemption is attempted.
    pub preemption_threshold: f64,
    /// How long shutdown waits for executing tasks, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Broadcast buffer for event subscribers.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            limits: PoolLimits::default(),
            predictor: PredictorConfig::default(),
            scheduler_interval_ms: 100,
            aging_interval_ms: 60_000,
            aging_step: 1.0,
            token_window_ms: 60_000,
            preemption_enabled: true,
            preemption_threshold: 0.9,
            shutdown_timeout_ms: 30_000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ManagerConfig {
    /// Configuration with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set resource pool maxima.
    #[must_use]
    pub fn with_limits(mut self, limits: PoolLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set predictor tuning.
    #[must_use]
    pub fn with_predictor(mut self, predictor: PredictorConfig) -> Self {
        self.predictor = predictor;
        self
    }

    /// Set the scheduling tick period.
    #[must_use]
    pub fn with_scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval_ms = millis(interval);
        self
    }

    /// Set the aging period and step.
    #[must_use]
    pub fn with_aging(mut self, interval: Duration, step: f64) -> Self {
        self.aging_interval_ms = millis(interval);
        self.aging_step = step;
        self
    }

    /// Set the token window.
    #[must_use]
    pub fn with_token_window(mut self, window: Duration) -> Self {
        self.token_window_ms = millis(window);
        self
    }

    /// Enable or disable preemption and set its utilization threshold.
    #[must_use]
    pub fn with_preemption(mut self, enabled: bool, threshold: f64) -> Self {
        self.preemption_enabled = enabled;
        self.preemption_threshold = threshold;
        self
    }

    /// Set the shutdown drain timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = millis(timeout);
        self
    }

    /// Set the event broadcast buffer.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Scheduling tick period.
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    /// Aging pass period.
    #[must_use]
    pub const fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }

    /// Token budget window.
    #[must_use]
    pub const fn token_window(&self) -> Duration {
        Duration::from_millis(self.token_window_ms)
    }

    /// Shutdown drain timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.limits.validate().map_err(|e| format!("limits: {e}"))?;
        self.predictor
            .validate()
            .map_err(|e| format!("predictor: {e}"))?;
        if self.scheduler_interval_ms == 0 {
            return Err("scheduler_interval_ms must be greater than 0".into());
        }
        if self.aging_interval_ms == 0 {
            return Err("aging_interval_ms must be greater than 0".into());
        }
        if !self.aging_step.is_finite() || self.aging_step <= 0.0 {
            return Err("aging_step must be a positive number".into());
        }
        if self.token_window_ms == 0 {
            return Err("token_window_ms must be greater than 0".into());
        }
        if !(0.0..=1.0).contains(&self.preemption_threshold) {
            return Err("preemption_threshold must be within [0, 1]".into());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `ARM_*` environment variables, reading a
    /// `.env` file first when one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if a variable cannot be parsed or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup, applying the
    /// same names and parsing as [`ManagerConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Fails if a value cannot be parsed or the result does not validate.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T, F>(lookup: &F, key: &str, target: &mut T) -> AppResult<()>
        where
            T: std::str::FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
            F: Fn(&str) -> Option<String>,
        {
            let name = format!("{ENV_PREFIX}{key}");
            if let Some(raw) = lookup(&name) {
                *target = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            }
            Ok(())
        }

        let mut cfg = Self::default();
        parse(&lookup, "MAX_CPU", &mut cfg.limits.max_cpu)?;
        parse(&lookup, "MAX_MEMORY", &mut cfg.limits.max_memory)?;
        parse(&lookup, "MAX_TOKENS_PER_MINUTE", &mut cfg.limits.max_tokens_per_minute)?;
        parse(&lookup, "MAX_CONCURRENT_TASKS", &mut cfg.limits.max_concurrent_tasks)?;
        parse(&lookup, "SCHEDULER_INTERVAL_MS", &mut cfg.scheduler_interval_ms)?;
        parse(&lookup, "AGING_INTERVAL_MS", &mut cfg.aging_interval_ms)?;
        parse(&lookup, "AGING_STEP", &mut cfg.aging_step)?;
        parse(&lookup, "TOKEN_WINDOW_MS", &mut cfg.token_window_ms)?;
        parse(&lookup, "PREEMPTION_ENABLED", &mut cfg.preemption_enabled)?;
        parse(&lookup, "PREEMPTION_THRESHOLD", &mut cfg.preemption_threshold)?;
        parse(&lookup, "SHUTDOWN_TIMEOUT_MS", &mut cfg.shutdown_timeout_ms)?;
        parse(&lookup, "HISTORY_LIMIT", &mut cfg.predictor.history_limit)?;

        cfg.validate()
            .map_err(|e| anyhow::anyhow!("configuration from environment invalid: {e}"))?;
        Ok(cfg)
    }
}
