//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, snapshot, submit_task, Health, ManagerSnapshot, TaskSubmission};
pub use tokio_spawner::TokioSpawner;
