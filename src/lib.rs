//! # Adaptive Resource Manager
//!
//! An in-process priority scheduler with predictive admission control for
//! heterogeneous asynchronous work such as AI inference, analysis and I/O jobs.
//!
//! Tasks are scored dynamically (base priority, age, deadline proximity,
//! ownership), placed in one of four priority bands and admitted only when the
//! resources a learning predictor expects them to need fit in a bounded pool.
//!
//! ## Key Features
//!
//! - **Four-way capacity accounting**: CPU share, memory bytes, a per-window
//!   token budget and concurrency slots
//! - **Learning predictor**: per-type history averages with size and keyword
//!   heuristics for unseen types
//! - **Strict band order**: Critical, High, Normal, Low
//! - **Aging**: long-waiting tasks drift toward more urgent bands
//! - **Preemption**: urgent tasks may evict Low-band tasks under pressure
//! - **Graceful shutdown**: bounded drain of executing tasks
//!
//! ## Example
//!
//! ```rust,ignore
//! use adaptive_resource_manager::config::ManagerConfig;
//! use adaptive_resource_manager::core::{AdaptiveResourceManager, Task, TaskContext, TaskError};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     adaptive_resource_manager::util::init_tracing();
//!
//!     let manager = AdaptiveResourceManager::new(ManagerConfig::from_env()?)?;
//!     let handle = manager.submit(
//!         Task::new(|ctx: TaskContext| async move {
//!             Ok::<_, TaskError>(format!("analyzed by {}", ctx.task_id))
//!         })
//!         .with_type("document-analysis")
//!         .with_deadline(std::time::SystemTime::now() + std::time::Duration::from_secs(120)),
//!     )?;
//!
//!     println!("{}", handle.await?);
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling core: priorities, pool, predictor and the manager.
pub mod core;
/// Configuration models for limits, loops and the predictor.
pub mod config;
/// Builders to construct managers from configuration.
pub mod builders;
/// Infrastructure adapters for the band queues.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
