//! Timer entry and handle types

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cqrpc_core::{CompletionQueue, Tag};

/// Globally unique timer handle for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Generate a new unique timer handle
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw handle value (for logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer entry - stored in the timer backend
///
/// On expiry the timer thread posts `(tag, true)` to `queue`.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub handle: TimerHandle,
    pub deadline: Instant,
    pub queue: Arc<CompletionQueue>,
    pub tag: Tag,
}

impl TimerEntry {
    /// Entry firing at an absolute deadline
    pub fn at(queue: Arc<CompletionQueue>, tag: Tag, deadline: Instant) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline,
            queue,
            tag,
        }
    }

    /// Entry firing `after` from now
    #[inline]
    pub fn after(queue: Arc<CompletionQueue>, tag: Tag, after: Duration) -> Self {
        Self::at(queue, tag, Instant::now() + after)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time remaining until deadline (zero if expired)
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrpc_core::{Op, SlotKey};

    #[test]
    fn test_handle_uniqueness() {
        let handles: Vec<_> = (0..1000).map(|_| TimerHandle::new()).collect();
        let unique: std::collections::HashSet<_> = handles.iter().collect();
        assert_eq!(handles.len(), unique.len());
    }

    #[test]
    fn test_entry_after() {
        let cq = Arc::new(CompletionQueue::new(0));
        let tag = SlotKey::new(4, 0).tag(Op::Alarm);
        let entry = TimerEntry::after(cq, tag, Duration::from_secs(5));

        assert_eq!(entry.tag, tag);
        assert!(!entry.is_expired());
        assert!(entry.remaining() > Duration::from_secs(4));
    }
}
