//! Infrastructure adapters: the in-memory queue backing each priority band.

pub mod queue;
pub use queue::{Keyed, PriorityQueue, QueueEntry};
