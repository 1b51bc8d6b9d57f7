//! Accept slot
//!
//! Single-use rendezvous between a server acceptor waiting for its next
//! call and the transport delivering one. Exactly one of
//! [`AcceptSlot::fill`] and [`AcceptSlot::cancel`] wins, and the winner
//! posts the slot's single completion.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::queue::CompletionQueue;
use crate::tag::Tag;

struct AcceptState<T> {
    value: Option<T>,
    completed: bool,
}

/// Pending accept registered with a transport
pub struct AcceptSlot<T> {
    queue: Arc<CompletionQueue>,
    tag: Tag,
    state: Mutex<AcceptState<T>>,
}

impl<T: Send> AcceptSlot<T> {
    pub fn new(queue: Arc<CompletionQueue>, tag: Tag) -> Arc<Self> {
        Arc::new(Self {
            queue,
            tag,
            state: Mutex::new(AcceptState {
                value: None,
                completed: false,
            }),
        })
    }

    /// Deliver an incoming call
    ///
    /// Posts `ok = true`. If the slot was already cancelled the call is
    /// handed back so the transport can offer it to another acceptor.
    pub fn fill(&self, value: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.completed {
                return Err(value);
            }
            state.completed = true;
            state.value = Some(value);
        }
        self.queue.post(self.tag, true);
        Ok(())
    }

    /// Withdraw interest; posts `ok = false` unless a call already arrived
    ///
    /// Returns whether this call completed the slot.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
        }
        self.queue.post(self.tag, false);
        true
    }

    /// Take the delivered call
    pub fn take(&self) -> Option<T> {
        self.state.lock().value.take()
    }

    /// Whether a fill or cancel has already happened
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn queue(&self) -> &Arc<CompletionQueue> {
        &self.queue
    }
}
