//! Resource pool with four-way capacity accounting.
//!
//! The pool gates CPU share, memory bytes, a per-window token budget and
//! concurrency slots. It knows nothing about tasks; callers hand it a
//! [`ResourceRequest`] and it answers whether the request fits.
//!
//! The pool is not internally synchronized. The manager keeps it inside its
//! single scheduler lock so that the admission check and the counter updates
//! in [`ResourcePool::allocate`] can never interleave with another caller.

use serde::{Deserialize, Serialize};

/// Default CPU share (percent of the host).
pub const DEFAULT_MAX_CPU: f64 = 100.0;
/// Default memory ceiling: 4 GiB.
pub const DEFAULT_MAX_MEMORY: u64 = 4 * 1024 * 1024 * 1024;
/// Default token budget per window.
pub const DEFAULT_MAX_TOKENS_PER_MINUTE: u64 = 100_000;
/// Default number of concurrently admitted tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

/// Configuration values for capacity enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    /// Total CPU share available to admitted tasks.
    pub max_cpu: f64,
    /// Total memory available to admitted tasks, in bytes.
    pub max_memory: u64,
    /// Tokens that may be consumed within one token window.
    pub max_tokens_per_minute: u64,
    /// Maximum number of simultaneously admitted tasks.
    pub max_concurrent_tasks: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_cpu: DEFAULT_MAX_CPU,
            max_memory: DEFAULT_MAX_MEMORY,
            max_tokens_per_minute: DEFAULT_MAX_TOKENS_PER_MINUTE,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl PoolLimits {
    /// Validate limit values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_cpu.is_finite() || self.max_cpu <= 0.0 {
            return Err("max_cpu must be a positive number".into());
        }
        if self.max_memory == 0 {
            return Err("max_memory must be greater than 0".into());
        }
        if self.max_tokens_per_minute == 0 {
            return Err("max_tokens_per_minute must be greater than 0".into());
        }
        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        Ok(())
    }
}

/// Resources requested for (or held by) a single task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU share.
    pub cpu: f64,
    /// Memory in bytes.
    pub memory: u64,
    /// Tokens charged against the current window.
    pub tokens: u64,
}

impl ResourceRequest {
    /// Build a request from its three components.
    #[must_use]
    pub const fn new(cpu: f64, memory: u64, tokens: u64) -> Self {
        Self { cpu, memory, tokens }
    }

    /// CPU plus memory, the quantity preemption tries to free.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn footprint(&self) -> f64 {
        self.cpu + self.memory as f64
    }
}

/// Utilization ratios, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Fraction of CPU share allocated.
    pub cpu: f64,
    /// Fraction of memory allocated.
    pub memory: f64,
    /// Fraction of the token budget consumed in this window.
    pub tokens: f64,
    /// Fraction of concurrency slots occupied.
    pub concurrency: f64,
}

impl ResourceUtilization {
    /// Mean of the CPU, memory and concurrency ratios. Tokens are excluded
    /// because the window resets independently of task completion.
    #[must_use]
    pub fn aggregate(&self) -> f64 {
        (self.cpu + self.memory + self.concurrency) / 3.0
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Configured maxima.
    pub limits: PoolLimits,
    /// CPU share not currently allocated.
    pub available_cpu: f64,
    /// Memory not currently allocated.
    pub available_memory: u64,
    /// Tokens consumed in the current window.
    pub tokens_used: u64,
    /// Admitted task count.
    pub active_tasks: usize,
    /// Ratios derived from the counters above.
    pub utilization: ResourceUtilization,
}

/// Resource pool tracking four bounded quantities.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    limits: PoolLimits,
    available_cpu: f64,
    available_memory: u64,
    tokens_used: u64,
    active_tasks: usize,
}

impl ResourcePool {
    /// Create a pool with every counter at its maximum.
    #[must_use]
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            available_cpu: limits.max_cpu,
            available_memory: limits.max_memory,
            tokens_used: 0,
            active_tasks: 0,
            limits,
        }
    }

    /// Configured maxima.
    #[must_use]
    pub const fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// Pure admission check; mutates nothing.
    #[must_use]
    pub fn can_admit(&self, req: &ResourceRequest) -> bool {
        self.available_cpu >= req.cpu
            && self.available_memory >= req.memory
            && self.tokens_used.saturating_add(req.tokens) <= self.limits.max_tokens_per_minute
            && self.active_tasks < self.limits.max_concurrent_tasks
    }

    /// Reserve resources for one task.
    ///
    /// Returns `false` without touching any counter when the request does not fit.
    pub fn allocate(&mut self, req: &ResourceRequest) -> bool {
        if !self.can_admit(req) {
            return false;
        }
        self.available_cpu = (self.available_cpu - req.cpu).max(0.0);
        self.available_memory -= req.memory;
        self.tokens_used += req.tokens;
        self.active_tasks += 1;
        tracing::debug!(
            cpu = req.cpu,
            memory = req.memory,
            tokens = req.tokens,
            active = self.active_tasks,
            "allocated resources"
        );
        true
    }

    /// Return resources held by one task.
    ///
    /// CPU and memory are clamped to their maxima, so a repeated release can
    /// never inflate capacity. Tokens stay charged until the window resets.
    pub fn release(&mut self, req: &ResourceRequest) {
        self.available_cpu = (self.available_cpu + req.cpu).min(self.limits.max_cpu);
        self.available_memory = self
            .available_memory
            .saturating_add(req.memory)
            .min(self.limits.max_memory);
        self.active_tasks = self.active_tasks.saturating_sub(1);
        tracing::debug!(
            cpu = req.cpu,
            memory = req.memory,
            active = self.active_tasks,
            "released resources"
        );
    }

    /// Hard reset of the token window.
    pub fn reset_token_window(&mut self) {
        if self.tokens_used > 0 {
            tracing::debug!(tokens_used = self.tokens_used, "token window reset");
        }
        self.tokens_used = 0;
    }

    /// Restore every counter to its initial state.
    pub fn reset(&mut self) {
        self.available_cpu = self.limits.max_cpu;
        self.available_memory = self.limits.max_memory;
        self.active_tasks = 0;
        self.reset_token_window();
    }

    /// CPU share not currently allocated.
    #[must_use]
    pub const fn available_cpu(&self) -> f64 {
        self.available_cpu
    }

    /// Memory not currently allocated.
    #[must_use]
    pub const fn available_memory(&self) -> u64 {
        self.available_memory
    }

    /// Tokens consumed in the current window.
    #[must_use]
    pub const fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Admitted task count.
    #[must_use]
    pub const fn active_tasks(&self) -> usize {
        self.active_tasks
    }

    /// Utilization ratios, each in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> ResourceUtilization {
        let ratio = |used: f64, max: f64| (used / max).clamp(0.0, 1.0);
        ResourceUtilization {
            cpu: ratio(self.limits.max_cpu - self.available_cpu, self.limits.max_cpu),
            memory: ratio(
                (self.limits.max_memory - self.available_memory) as f64,
                self.limits.max_memory as f64,
            ),
            tokens: ratio(
                self.tokens_used as f64,
                self.limits.max_tokens_per_minute as f64,
            ),
            concurrency: ratio(
                self.active_tasks as f64,
                self.limits.max_concurrent_tasks as f64,
            ),
        }
    }

    /// Point-in-time view of every counter.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            limits: self.limits.clone(),
            available_cpu: self.available_cpu,
            available_memory: self.available_memory,
            tokens_used: self.tokens_used,
            active_tasks: self.active_tasks,
            utilization: self.utilization(),
        }
    }
}
