//! Weak registry of live calls
//!
//! Entries never keep a call alive. They exist so a manager can force-close
//! every call still alive at shutdown, and they are pruned lazily: expired
//! entries are dropped by the next [`Registry::collect`] pass, which the
//! owner runs on every call creation.

use std::sync::{Arc, Weak};

/// Something the registry can force-close
pub trait Closeable: Send + Sync {
    /// Idempotent; never blocks on the call draining
    fn close(&self);
}

#[derive(Default)]
pub struct Registry {
    entries: Vec<Weak<dyn Closeable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: Weak<dyn Closeable>) {
        self.entries.push(entry);
    }

    /// Drop expired entries; returns how many were removed
    pub fn collect(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.strong_count() > 0);
        before - self.entries.len()
    }

    /// Empty the registry, returning strong references to the live entries
    pub fn take_live(&mut self) -> Vec<Arc<dyn Closeable>> {
        self.entries.drain(..).filter_map(|e| e.upgrade()).collect()
    }

    /// Entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
