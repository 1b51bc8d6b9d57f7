//! Handler slab
//!
//! Arena of live call handlers addressed by [`SlotKey`]. The event loop
//! resolves every completion tag through the slab, so a call stays
//! reachable from the loop exactly as long as it has a slot. Calls remove
//! themselves once their last pending operation has drained.
//!
//! Freed indices are reused LIFO; each reuse bumps the slot generation so
//! stale tags resolve to nothing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::tag::SlotKey;

struct Entry {
    generation: u32,
    handler: Option<Arc<dyn Handler>>,
    /// Reserved but not yet filled
    reserved: bool,
}

struct SlabInner {
    entries: Vec<Entry>,
    /// LIFO stack of free slot indices (for reuse)
    free_stack: Vec<u32>,
}

/// Arena of handlers reachable from completion tags
pub struct HandlerSlab {
    inner: Mutex<SlabInner>,
    max_slots: u32,
    allocated_count: AtomicU32,
}

impl HandlerSlab {
    pub fn new(max_slots: usize) -> Self {
        let max_slots = max_slots.min(u32::MAX as usize - 1) as u32;
        Self {
            inner: Mutex::new(SlabInner {
                entries: Vec::new(),
                free_stack: Vec::new(),
            }),
            max_slots,
            allocated_count: AtomicU32::new(0),
        }
    }

    /// Reserve a slot and build its handler
    ///
    /// `make` runs without the slab lock held and receives the key the
    /// handler will be reachable under. The handler must not issue any
    /// operation before this returns, since its slot is only filled after
    /// `make` completes.
    pub fn insert_with<H, F>(&self, make: F) -> Result<Arc<H>>
    where
        H: Handler + 'static,
        F: FnOnce(SlotKey) -> Arc<H>,
    {
        let key = self.reserve()?;
        let handler = make(key);
        let erased: Arc<dyn Handler> = handler.clone();

        let mut inner = self.inner.lock();
        let entry = &mut inner.entries[key.as_usize()];
        entry.reserved = false;
        entry.handler = Some(erased);
        Ok(handler)
    }

    fn reserve(&self) -> Result<SlotKey> {
        let mut inner = self.inner.lock();

        // Prefer a recycled slot
        if let Some(index) = inner.free_stack.pop() {
            let entry = &mut inner.entries[index as usize];
            entry.reserved = true;
            self.allocated_count.fetch_add(1, Ordering::Relaxed);
            return Ok(SlotKey::new(index, entry.generation));
        }

        let index = inner.entries.len() as u32;
        if index >= self.max_slots {
            return Err(Error::SlabFull {
                capacity: self.max_slots as usize,
            });
        }
        inner.entries.push(Entry {
            generation: 0,
            handler: None,
            reserved: true,
        });
        self.allocated_count.fetch_add(1, Ordering::Relaxed);
        Ok(SlotKey::new(index, 0))
    }

    /// Resolve a key to its handler, if the slot still holds that generation
    pub fn get(&self, key: SlotKey) -> Option<Arc<dyn Handler>> {
        if key.is_none() {
            return None;
        }
        let inner = self.inner.lock();
        let entry = inner.entries.get(key.as_usize())?;
        if entry.generation != key.generation() {
            return None;
        }
        entry.handler.clone()
    }

    /// Release a slot
    ///
    /// Returns the handler so the caller can drop it outside the slab lock.
    /// A key whose generation has already moved on is ignored.
    pub fn remove(&self, key: SlotKey) -> Option<Arc<dyn Handler>> {
        if key.is_none() {
            return None;
        }
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(key.as_usize())?;
        if entry.generation != key.generation() || entry.reserved {
            return None;
        }
        let handler = entry.handler.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        inner.free_stack.push(key.index());
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
        Some(handler)
    }

    /// Take every remaining handler out of the slab
    ///
    /// Used once the event loops have been joined; whatever is left had a
    /// completion that will never arrive.
    pub fn clear(&self) -> Vec<Arc<dyn Handler>> {
        let mut inner = self.inner.lock();
        let mut taken = Vec::new();
        let SlabInner {
            entries,
            free_stack,
        } = &mut *inner;
        for (index, entry) in entries.iter_mut().enumerate() {
            if let Some(handler) = entry.handler.take() {
                entry.generation = entry.generation.wrapping_add(1);
                free_stack.push(index as u32);
                taken.push(handler);
            }
        }
        self.allocated_count
            .fetch_sub(taken.len() as u32, Ordering::Relaxed);
        taken
    }

    /// Number of live handlers
    #[inline]
    pub fn len(&self) -> usize {
        self.allocated_count.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots as usize
    }
}
