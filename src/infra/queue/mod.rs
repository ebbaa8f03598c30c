//! Queue backends.

pub mod heap;

pub use heap::{Keyed, PriorityQueue, QueueEntry};
