//! Configuration models for the manager, its resource pool and predictor.

pub mod manager;

pub use manager::ManagerConfig;
pub use crate::core::predictor::PredictorConfig;
pub use crate::core::resource_pool::PoolLimits;
