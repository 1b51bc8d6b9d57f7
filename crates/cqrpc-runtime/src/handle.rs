//! Application handles and call slots
//!
//! A call is owned by the application through a [`Handle`]. Dropping the
//! last clone runs the release step: the call is closed, its pending
//! operations drain on the event loop, and the call frees itself from the
//! slab once the last one has been processed.

use std::ops::Deref;
use std::sync::Arc;

use cqrpc_core::{CompletionQueue, HandlerSlab, Op, SlotKey, Tag};

use crate::registry::Closeable;

/// Where a call lives: its bound queue and its key in the handler slab
#[derive(Clone)]
pub struct CallSlot {
    queue: Arc<CompletionQueue>,
    slab: Arc<HandlerSlab>,
    key: SlotKey,
}

impl CallSlot {
    pub fn new(queue: Arc<CompletionQueue>, slab: Arc<HandlerSlab>, key: SlotKey) -> Self {
        Self { queue, slab, key }
    }

    #[inline]
    pub fn key(&self) -> SlotKey {
        self.key
    }

    #[inline]
    pub fn tag(&self, op: Op) -> Tag {
        self.key.tag(op)
    }

    #[inline]
    pub fn queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }

    /// Post a completion for `op` onto this call's own queue
    #[inline]
    pub fn post(&self, op: Op, ok: bool) {
        self.queue.post(self.tag(op), ok);
    }

    /// Remove the call from the slab
    ///
    /// Must only be called once no operation of this call is pending. The
    /// call itself stays alive for as long as any handle or in-progress
    /// dispatch still references it.
    pub fn retire(&self) {
        if self.slab.remove(self.key).is_some() {
            tracing::trace!(key = %self.key, "call retired");
        }
    }
}

impl std::fmt::Debug for CallSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSlot")
            .field("queue", &self.queue.id())
            .field("key", &self.key)
            .finish()
    }
}

/// Application-facing owner of a call
///
/// Derefs to the call so its methods (`close`, `write`, ...) are available
/// directly on the handle.
pub struct CallHandle<C: Closeable> {
    call: Arc<C>,
}

/// Reference-counted handle returned by every factory
pub type Handle<C> = Arc<CallHandle<C>>;

impl<C: Closeable> CallHandle<C> {
    pub fn new(call: Arc<C>) -> Handle<C> {
        Arc::new(Self { call })
    }

    /// Cancel the call now; later calls are no-ops
    pub fn close(&self) {
        self.call.close();
    }
}

impl<C: Closeable> Deref for CallHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.call
    }
}

impl<C: Closeable> Closeable for CallHandle<C> {
    fn close(&self) {
        self.call.close();
    }
}

impl<C: Closeable> Drop for CallHandle<C> {
    fn drop(&mut self) {
        // Release: last application reference gone
        self.call.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe(AtomicUsize);

    impl Closeable for Probe {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_of_last_clone_releases() {
        let probe = Arc::new(Probe(AtomicUsize::new(0)));
        let handle = CallHandle::new(Arc::clone(&probe));
        let clone = Arc::clone(&handle);

        drop(handle);
        assert_eq!(probe.0.load(Ordering::SeqCst), 0);

        drop(clone);
        assert_eq!(probe.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_derefs_to_call() {
        let handle = CallHandle::new(Arc::new(Probe(AtomicUsize::new(0))));
        handle.close();
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
    }
}
