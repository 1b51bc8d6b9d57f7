//! BinaryHeap-based timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (removes from the live set; the heap entry is skipped later)
//! - Poll expired: O(k log n) where k = number of expired or skipped timers
//!
//! # Cancellation
//!
//! A handle is live from `insert` until it is either returned by
//! `poll_expired` or removed by `cancel`, and only one of the two can
//! happen. `cancel` reports which way it went, which is what lets the
//! caller post the cancellation completion itself without ever producing a
//! second completion for the same entry.

use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use parking_lot::Mutex;

use super::{ExpiredTimer, TimerBackend, TimerEntry, TimerHandle};

/// Wrapper for heap ordering (min-heap by deadline)
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse for min-heap; tie-break on handle so equal deadlines fire
        // in insertion order
        match other.0.deadline.cmp(&self.0.deadline) {
            std::cmp::Ordering::Equal => other.0.handle.raw().cmp(&self.0.handle.raw()),
            ord => ord,
        }
    }
}

struct HeapInner {
    heap: BinaryHeap<HeapEntry>,

    /// Handles neither fired nor cancelled
    live: HashSet<TimerHandle>,

    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl HeapInner {
    /// Drop cancelled entries sitting at the top of the heap
    fn skip_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.0.handle) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// BinaryHeap-based timer backend
pub struct HeapTimerBackend {
    inner: Mutex<HeapInner>,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HeapInner {
                heap: BinaryHeap::with_capacity(capacity),
                live: HashSet::with_capacity(capacity),
                total_inserted: 0,
                total_fired: 0,
                total_cancelled: 0,
            }),
        }
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> HeapTimerStats {
        let inner = self.inner.lock();
        HeapTimerStats {
            active: inner.live.len(),
            heap_len: inner.heap.len(),
            total_inserted: inner.total_inserted,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        let mut inner = self.inner.lock();
        inner.live.insert(handle);
        inner.heap.push(HeapEntry(entry));
        inner.total_inserted += 1;
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.live.remove(&handle);
        if removed {
            inner.total_cancelled += 1;
            inner.skip_cancelled();
        }
        removed
    }

    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();

        while let Some(top) = inner.heap.peek() {
            if top.0.deadline > now {
                break;
            }
            let Some(HeapEntry(entry)) = inner.heap.pop() else {
                break;
            };
            if !inner.live.remove(&entry.handle) {
                continue;
            }
            inner.total_fired += 1;
            expired.push(ExpiredTimer {
                handle: entry.handle,
                queue: entry.queue,
                tag: entry.tag,
            });
        }

        inner.skip_cancelled();
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.inner.lock();
        inner.skip_cancelled();
        inner.heap.peek().map(|e| e.0.deadline)
    }

    fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}

/// Statistics for HeapTimerBackend
#[derive(Debug, Clone)]
pub struct HeapTimerStats {
    /// Live (armed, not cancelled) timers
    pub active: usize,
    /// Heap entries including cancelled ones not yet skipped
    pub heap_len: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}
