//! Timer subsystem
//!
//! Drives alarms. A single timer thread per manager polls a
//! [`TimerBackend`] and posts `(tag, true)` to each expired entry's
//! completion queue, so alarm callbacks run on the event loop like every
//! other completion.
//!
//! ```text
//!   Alarm::set ──insert──► dyn TimerBackend ◄──poll_expired── timer thread
//!   Alarm::cancel ─cancel─►       │                               │
//!                                 ▼                               ▼
//!                           HeapTimerBackend            CompletionQueue::post
//! ```

mod entry;
mod heap;
mod worker;

pub use entry::{TimerEntry, TimerHandle};
pub use heap::{HeapTimerBackend, HeapTimerStats};
pub use worker::{TimerService, TimerStats, TimerThreadConfig};

use std::sync::Arc;
use std::time::Instant;

use cqrpc_core::{CompletionQueue, Tag};

/// Expired timer ready to be posted
#[derive(Debug, Clone)]
pub struct ExpiredTimer {
    pub handle: TimerHandle,
    pub queue: Arc<CompletionQueue>,
    pub tag: Tag,
}

impl ExpiredTimer {
    /// Post the expiry completion
    pub fn fire(&self) {
        self.queue.post(self.tag, true);
    }
}

/// Core timer trait
///
/// Thread-safe: the timer thread polls while event-loop and application
/// threads insert and cancel.
pub trait TimerBackend: Send + Sync {
    /// Insert a timer entry, returns handle for cancellation
    fn insert(&self, entry: TimerEntry) -> TimerHandle;

    /// Cancel a timer
    ///
    /// Returns true only if the timer was still pending, in which case it
    /// will never be returned by `poll_expired`.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove and return every timer due at `now`
    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer>;

    /// Earliest pending deadline, if any
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of pending timers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}
