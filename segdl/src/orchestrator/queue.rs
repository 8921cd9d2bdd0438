//! Priority queue of transfers waiting for an active slot.
//!
//! Entries are ordered by priority (higher values first), then by
//! submission sequence (FIFO within the same priority level).
//!
//! # Example
//!
//! ```ignore
//! let mut queue = PriorityQueue::new();
//!
//! queue.push(QueuedTransfer::new(low_id, Priority::LOW, 0));
//! queue.push(QueuedTransfer::new(high_id, Priority::HIGH, 1));
//!
//! // HIGH comes out first despite being pushed second
//! assert_eq!(queue.pop().unwrap().priority, Priority::HIGH);
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::model::{Priority, Transfer, TransferId};

// =============================================================================
// Queued Transfer
// =============================================================================

/// A transfer waiting to be admitted.
#[derive(Debug, Clone)]
pub struct QueuedTransfer {
    pub id: TransferId,
    pub priority: Priority,

    /// Submission order for FIFO within a priority level.
    pub sequence: u64,

    /// When the entry was queued (for wait time reporting).
    pub enqueued_at: Instant,
}

impl QueuedTransfer {
    pub fn new(id: TransferId, priority: Priority, sequence: u64) -> Self {
        Self {
            id,
            priority,
            sequence,
            enqueued_at: Instant::now(),
        }
    }

    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self::new(transfer.id.clone(), transfer.priority, transfer.sequence)
    }

    /// How long this entry has been waiting.
    pub fn wait_time(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }
}

// Ordering for BinaryHeap: higher priority first, then lower sequence first
impl PartialEq for QueuedTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTransfer {}

impl PartialOrd for QueuedTransfer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTransfer {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Reverse: the older (lower) sequence is the greater entry
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

// =============================================================================
// Priority Queue
// =============================================================================

/// Max-heap of queued transfers.
///
/// Not thread-safe; the orchestrator keeps it inside its registry mutex.
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedTransfer>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: QueuedTransfer) {
        self.heap.push(entry);
    }

    /// Removes and returns the best entry.
    pub fn pop(&mut self) -> Option<QueuedTransfer> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueuedTransfer> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.heap.iter().any(|e| &e.id == id)
    }

    /// Removes the entry for `id`, returning it if it was queued.
    pub fn remove(&mut self, id: &TransferId) -> Option<QueuedTransfer> {
        if !self.contains(id) {
            return None;
        }
        let mut removed = None;
        let remaining: Vec<_> = self
            .heap
            .drain()
            .filter_map(|e| {
                if &e.id == id && removed.is_none() {
                    removed = Some(e);
                    None
                } else {
                    Some(e)
                }
            })
            .collect();
        self.heap = BinaryHeap::from(remaining);
        removed
    }

    /// Entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedTransfer> {
        self.heap.iter()
    }

    /// Number of entries at each priority level.
    pub fn priority_counts(&self) -> HashMap<Priority, usize> {
        let mut counts = HashMap::new();
        for entry in self.heap.iter() {
            *counts.entry(entry.priority).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("priority_counts", &self.priority_counts())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, priority: Priority, sequence: u64) -> QueuedTransfer {
        QueuedTransfer::new(TransferId::new(id), priority, sequence)
    }

    fn drain(queue: &mut PriorityQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop())
            .map(|e| e.id.to_string())
            .collect()
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = PriorityQueue::new();

        queue.push(entry("low", Priority::LOW, 0));
        queue.push(entry("high", Priority::HIGH, 1));
        queue.push(entry("normal", Priority::NORMAL, 2));

        assert_eq!(drain(&mut queue), vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = PriorityQueue::new();

        queue.push(entry("second", Priority::NORMAL, 2));
        queue.push(entry("first", Priority::NORMAL, 1));
        queue.push(entry("third", Priority::NORMAL, 3));

        assert_eq!(drain(&mut queue), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_custom_priority_between_levels() {
        let mut queue = PriorityQueue::new();

        queue.push(entry("normal", Priority::NORMAL, 0));
        queue.push(entry("custom", Priority(50), 1));
        queue.push(entry("high", Priority::HIGH, 2));

        assert_eq!(drain(&mut queue), vec!["high", "custom", "normal"]);
    }

    #[test]
    fn test_remove() {
        let mut queue = PriorityQueue::new();
        queue.push(entry("a", Priority::NORMAL, 0));
        queue.push(entry("b", Priority::HIGH, 1));
        queue.push(entry("c", Priority::NORMAL, 2));

        let removed = queue.remove(&TransferId::new("b")).unwrap();
        assert_eq!(removed.priority, Priority::HIGH);
        assert!(queue.remove(&TransferId::new("b")).is_none());
        assert!(!queue.contains(&TransferId::new("b")));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().id, TransferId::new("a"));
    }

    #[test]
    fn test_priority_counts() {
        let mut queue = PriorityQueue::new();
        queue.push(entry("t1", Priority::HIGH, 0));
        queue.push(entry("t2", Priority::HIGH, 1));
        queue.push(entry("t3", Priority::LOW, 2));

        let counts = queue.priority_counts();
        assert_eq!(counts.get(&Priority::HIGH), Some(&2));
        assert_eq!(counts.get(&Priority::LOW), Some(&1));
        assert_eq!(counts.get(&Priority::NORMAL), None);
    }

    #[test]
    fn test_wait_time() {
        let queued = entry("w", Priority::NORMAL, 0);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(queued.wait_time() >= std::time::Duration::from_millis(10));
    }
}
