//! Event-loop thread management
//!
//! Each event-loop thread owns exactly one [`CompletionQueue`] and drains it
//! until the queue reports exhaustion. Every event's tag is resolved
//! through the shared [`HandlerSlab`] and dispatched to the handler's
//! `proceed`, on this thread, with no lock held.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cqrpc_core::{CompletionQueue, HandlerSlab, Result};

thread_local! {
    static CURRENT_LOOP_ID: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Index of the event loop running on this thread, if any
#[inline]
pub fn current_loop_id() -> Option<usize> {
    let id = CURRENT_LOOP_ID.with(|cell| cell.get());
    (id != usize::MAX).then_some(id)
}

/// Per-loop counters, returned when the thread exits
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    /// Events dispatched to a live handler
    pub dispatched: u64,

    /// Events whose slot had already been retired or reused
    pub stale: u64,
}

/// Fixed pool of event-loop threads, one completion queue each
pub struct EventLoopPool {
    queues: Vec<Arc<CompletionQueue>>,
    handles: Vec<JoinHandle<LoopStats>>,
}

impl EventLoopPool {
    /// Spawn `threads` event loops named `{prefix}-{i}`
    ///
    /// If a spawn fails, loops already started are shut down and joined
    /// before the error is returned.
    pub fn spawn(threads: usize, prefix: &str, slab: Arc<HandlerSlab>) -> Result<Self> {
        let mut pool = Self {
            queues: Vec::with_capacity(threads),
            handles: Vec::with_capacity(threads),
        };

        for i in 0..threads {
            let queue = Arc::new(CompletionQueue::new(i));
            let loop_queue = Arc::clone(&queue);
            let loop_slab = Arc::clone(&slab);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", prefix, i))
                .spawn(move || event_loop(i, loop_queue, loop_slab));

            match spawned {
                Ok(handle) => {
                    pool.queues.push(queue);
                    pool.handles.push(handle);
                }
                Err(e) => {
                    tracing::error!(index = i, error = %e, "failed to spawn event loop");
                    pool.shutdown_queues();
                    pool.join();
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(threads, "event loops started");
        Ok(pool)
    }

    /// Queue for round-robin slot `n`
    #[inline]
    pub fn queue(&self, n: usize) -> &Arc<CompletionQueue> {
        &self.queues[n % self.queues.len()]
    }

    #[inline]
    pub fn queues(&self) -> &[Arc<CompletionQueue>] {
        &self.queues
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Stop accepting events; loops exit once their backlog is drained
    pub fn shutdown_queues(&self) {
        for queue in &self.queues {
            queue.shutdown();
        }
    }

    /// Wait for every loop to exit
    ///
    /// A loop cannot join itself: when called from one of the pool's own
    /// threads, that thread is left to exit on its own once it returns to
    /// its drained queue.
    pub fn join(self) -> LoopStats {
        let me = thread::current().id();
        let mut total = LoopStats::default();

        for handle in self.handles {
            if handle.thread().id() == me {
                tracing::debug!("shutdown called from an event loop, not joining it");
                continue;
            }
            match handle.join() {
                Ok(stats) => {
                    total.dispatched += stats.dispatched;
                    total.stale += stats.stale;
                }
                Err(_) => tracing::error!("event loop panicked"),
            }
        }

        total
    }
}

/// Drain one queue until shutdown
fn event_loop(id: usize, queue: Arc<CompletionQueue>, slab: Arc<HandlerSlab>) -> LoopStats {
    CURRENT_LOOP_ID.with(|cell| cell.set(id));
    let mut stats = LoopStats::default();

    while let Some(event) = queue.next() {
        tracing::trace!(queue = id, tag = %event.tag, ok = event.ok, "dispatch");

        // Resolve under the slab lock, dispatch without it
        match slab.get(event.tag.key) {
            Some(handler) => {
                handler.proceed(event.tag.op, event.ok);
                stats.dispatched += 1;
            }
            None => {
                tracing::trace!(queue = id, tag = %event.tag, "stale tag dropped");
                stats.stale += 1;
            }
        }
    }

    tracing::trace!(
        queue = id,
        dispatched = stats.dispatched,
        stale = stats.stale,
        "event loop exited"
    );
    stats
}
