//! Completion queue
//!
//! An ordered multiplexed channel of `(tag, ok)` events, drained by exactly
//! one worker thread.
//!
//! # Shutdown semantics
//!
//! After [`CompletionQueue::shutdown`] no new event is accepted, but every
//! event pushed before it is still handed out by [`CompletionQueue::next`].
//! Only once the backlog is empty does `next` return `None`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::tag::Tag;

/// A delivered completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tag: Tag,
    pub ok: bool,
}

struct QueueState {
    events: VecDeque<Event>,
    shutdown: bool,
}

/// Completion queue bound to one event loop
pub struct CompletionQueue {
    id: usize,
    state: Mutex<QueueState>,
    condvar: Condvar,
    /// Lifetime count of accepted events
    pushed: AtomicU64,
}

impl CompletionQueue {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(64),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            pushed: AtomicU64::new(0),
        }
    }

    /// Queue index within its pool
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Post a completion
    ///
    /// Fails with [`Error::QueueShutdown`] once the queue has been shut
    /// down; the event is not delivered in that case.
    pub fn push(&self, tag: Tag, ok: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(Error::QueueShutdown);
            }
            state.events.push_back(Event { tag, ok });
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.condvar.notify_one();
        Ok(())
    }

    /// Post a completion, logging instead of failing if the queue is gone
    ///
    /// Transports use this: a completion for a queue that has already been
    /// drained has nobody left to deliver to.
    pub fn post(&self, tag: Tag, ok: bool) {
        if self.push(tag, ok).is_err() {
            tracing::trace!(queue = self.id, %tag, ok, "completion dropped, queue shut down");
        }
    }

    /// Block until the next event, or `None` once shut down and drained
    pub fn next(&self) -> Option<Event> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.shutdown {
                return None;
            }
            self.condvar.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`next`](Self::next)
    pub fn try_next(&self) -> Option<Event> {
        self.state.lock().events.pop_front()
    }

    /// Stop accepting events and wake the drainer
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Events waiting to be drained
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events accepted over the queue's lifetime
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{Op, SlotKey};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn tag(i: u32) -> Tag {
        SlotKey::new(i, 0).tag(Op::Read)
    }

    #[test]
    fn test_fifo_order() {
        let cq = CompletionQueue::new(0);
        for i in 0..5 {
            cq.push(tag(i), i % 2 == 0).unwrap();
        }
        for i in 0..5 {
            let ev = cq.next().unwrap();
            assert_eq!(ev.tag, tag(i));
            assert_eq!(ev.ok, i % 2 == 0);
        }
        assert!(cq.try_next().is_none());
    }

    #[test]
    fn test_shutdown_drains_backlog() {
        let cq = CompletionQueue::new(0);
        cq.push(tag(1), true).unwrap();
        cq.push(tag(2), false).unwrap();
        cq.shutdown();

        assert!(matches!(cq.push(tag(3), true), Err(Error::QueueShutdown)));
        assert_eq!(cq.next().unwrap().tag, tag(1));
        assert_eq!(cq.next().unwrap().tag, tag(2));
        assert!(cq.next().is_none());
        assert_eq!(cq.pushed_count(), 2);
    }

    #[test]
    fn test_next_blocks_until_push() {
        let cq = Arc::new(CompletionQueue::new(0));
        let cq2 = Arc::clone(&cq);

        let drainer = thread::spawn(move || cq2.next());

        thread::sleep(Duration::from_millis(20));
        cq.push(tag(9), true).unwrap();

        let ev = drainer.join().unwrap().unwrap();
        assert_eq!(ev.tag, tag(9));
    }

    #[test]
    fn test_shutdown_wakes_blocked_drainer() {
        let cq = Arc::new(CompletionQueue::new(0));
        let cq2 = Arc::clone(&cq);

        let drainer = thread::spawn(move || cq2.next());

        thread::sleep(Duration::from_millis(20));
        cq.shutdown();
        assert!(drainer.join().unwrap().is_none());
    }
}
