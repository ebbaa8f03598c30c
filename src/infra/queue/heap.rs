//! Indexed binary min-heap.
//!
//! Entries live in a `Vec` laid out as a binary heap ordered by ascending
//! priority (lowest value first). A side map from key to heap slot makes
//! membership checks O(1) and lets `update_priority` and `remove` find their
//! target without a scan.
//!
//! Every slot move goes through [`PriorityQueue::swap`], which updates the map
//! in the same step. A swap that skipped the map would leave later lookups
//! pointing at the wrong entry.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// Items stored in a [`PriorityQueue`] expose a stable unique key.
///
/// The key must not change while the item is queued.
pub trait Keyed {
    /// Unique key of this item.
    fn key(&self) -> &str;
}

/// Item wrapped with its priority and enqueue time.
#[derive(Debug, Clone)]
pub struct QueueEntry<T> {
    /// Queued item.
    pub item: T,
    /// Heap key; lower is served first.
    pub priority: f64,
    /// When the item entered this queue.
    pub enqueued_at: Instant,
}

/// Binary min-heap with O(1) lookup by key.
///
/// Equal priorities are served in heap order, not insertion order.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Vec<QueueEntry<T>>,
    index: HashMap<String, usize>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> PriorityQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether an entry with this key is queued. O(1).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entry with this key, if queued. O(1).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueueEntry<T>> {
        self.index.get(key).map(|&slot| &self.heap[slot])
    }

    /// Insert an item. O(log n).
    ///
    /// # Errors
    ///
    /// Hands the item back if its key is already queued.
    pub fn enqueue(&mut self, item: T, priority: f64) -> Result<(), T> {
        if self.index.contains_key(item.key()) {
            return Err(item);
        }
        let slot = self.heap.len();
        self.index.insert(item.key().to_owned(), slot);
        self.heap.push(QueueEntry {
            item,
            priority,
            enqueued_at: Instant::now(),
        });
        self.sift_up(slot);
        Ok(())
    }

    /// Remove and return the entry with the lowest priority. O(log n).
    pub fn dequeue(&mut self) -> Option<QueueEntry<T>> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.take_slot(0))
    }

    /// Entry with the lowest priority. O(1).
    #[must_use]
    pub fn peek(&self) -> Option<&QueueEntry<T>> {
        self.heap.first()
    }

    /// Change the priority of a queued entry, sifting in whichever direction
    /// the change requires. O(log n).
    ///
    /// Returns `false` if the key is not queued.
    pub fn update_priority(&mut self, key: &str, priority: f64) -> bool {
        let Some(&slot) = self.index.get(key) else {
            return false;
        };
        let previous = self.heap[slot].priority;
        self.heap[slot].priority = priority;
        match priority.total_cmp(&previous) {
            Ordering::Less => self.sift_up(slot),
            Ordering::Greater => self.sift_down(slot),
            Ordering::Equal => {}
        }
        true
    }

    /// Remove the entry with this key, returning it. O(log n).
    pub fn remove(&mut self, key: &str) -> Option<QueueEntry<T>> {
        let slot = *self.index.get(key)?;
        Some(self.take_slot(slot))
    }

    /// Entries sorted by ascending priority. O(n log n), leaves the heap untouched.
    #[must_use]
    pub fn to_array(&self) -> Vec<&QueueEntry<T>> {
        let mut entries: Vec<&QueueEntry<T>> = self.heap.iter().collect();
        entries.sort_by(|a, b| a.priority.total_cmp(&b.priority));
        entries
    }

    /// Entries in heap order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<T>> {
        self.heap.iter()
    }

    /// Remove every entry, returning them in heap order.
    pub fn drain(&mut self) -> Vec<QueueEntry<T>> {
        self.index.clear();
        std::mem::take(&mut self.heap)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Detach the entry at `slot`: swap it with the last slot, pop it, then
    /// restore heap order at `slot`.
    fn take_slot(&mut self, slot: usize) -> QueueEntry<T> {
        let last = self.heap.len() - 1;
        if slot != last {
            self.swap(slot, last);
        }
        let entry = self
            .heap
            .pop()
            .unwrap_or_else(|| unreachable!("take_slot on empty heap"));
        self.index.remove(entry.item.key());
        if slot < self.heap.len() {
            self.sift_down(slot);
            self.sift_up(slot);
        }
        entry
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[slot].priority.total_cmp(&self.heap[parent].priority) != Ordering::Less {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;
            if left < len
                && self.heap[left].priority.total_cmp(&self.heap[smallest].priority) == Ordering::Less
            {
                smallest = left;
            }
            if right < len
                && self.heap[right].priority.total_cmp(&self.heap[smallest].priority) == Ordering::Less
            {
                smallest = right;
            }
            if smallest == slot {
                break;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    /// Swap two heap slots and their index entries together.
    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        if let Some(pos) = self.index.get_mut(self.heap[a].item.key()) {
            *pos = a;
        }
        if let Some(pos) = self.index.get_mut(self.heap[b].item.key()) {
            *pos = b;
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.heap.len(), self.index.len(), "index size drifted");
        for (slot, entry) in self.heap.iter().enumerate() {
            assert_eq!(
                self.index.get(entry.item.key()),
                Some(&slot),
                "index for {} points at the wrong slot",
                entry.item.key()
            );
            if slot > 0 {
                let parent = (slot - 1) / 2;
                assert!(
                    self.heap[parent].priority <= entry.priority,
                    "heap order violated at slot {slot}"
                );
            }
        }
    }
}
