//! One direction of a loopback call
//!
//! A message buffer, a closed flag and at most one parked reader. Messages
//! come out in the order they went in. Closing is a half-close: buffered
//! messages stay readable, then reads fail. Cancelling drops them too.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use cqrpc_core::{CompletionQueue, Tag};

/// Where to post a pending operation's completion
pub(crate) struct Waiter {
    queue: Arc<CompletionQueue>,
    tag: Tag,
}

impl Waiter {
    pub(crate) fn new(queue: Arc<CompletionQueue>, tag: Tag) -> Self {
        Self { queue, tag }
    }

    pub(crate) fn complete(self, ok: bool) {
        self.queue.post(self.tag, ok);
    }
}

struct PipeState<T> {
    buf: VecDeque<T>,
    /// Message handed to the last successful read
    ready: Option<T>,
    closed: bool,
    reader: Option<Waiter>,
}

pub(crate) struct Pipe<T> {
    state: Mutex<PipeState<T>>,
}

impl<T> Pipe<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                ready: None,
                closed: false,
                reader: None,
            }),
        }
    }

    /// Queue `msg`; false once the pipe is closed
    pub(crate) fn send(&self, msg: T) -> bool {
        let woken = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            match state.reader.take() {
                Some(reader) => {
                    state.ready = Some(msg);
                    Some(reader)
                }
                None => {
                    state.buf.push_back(msg);
                    None
                }
            }
        };
        if let Some(reader) = woken {
            reader.complete(true);
        }
        true
    }

    /// Start a read; completes at once when a message or the end is known
    pub(crate) fn read(&self, waiter: Waiter) {
        let ok = {
            let mut state = self.state.lock();
            if let Some(msg) = state.buf.pop_front() {
                state.ready = Some(msg);
                true
            } else if state.closed {
                false
            } else {
                state.reader = Some(waiter);
                return;
            }
        };
        waiter.complete(ok);
    }

    pub(crate) fn take_ready(&self) -> Option<T> {
        self.state.lock().ready.take()
    }

    /// Pop a buffered message without a read operation
    pub(crate) fn take_buffered(&self) -> Option<T> {
        self.state.lock().buf.pop_front()
    }

    /// Half-close; a parked reader fails once the buffer is empty
    pub(crate) fn close(&self) {
        let woken = {
            let mut state = self.state.lock();
            state.closed = true;
            state.reader.take()
        };
        if let Some(reader) = woken {
            reader.complete(false);
        }
    }

    /// Close and drop everything still buffered
    pub(crate) fn cancel(&self) {
        let (woken, dropped) = {
            let mut state = self.state.lock();
            state.closed = true;
            (state.reader.take(), std::mem::take(&mut state.buf))
        };
        drop(dropped);
        if let Some(reader) = woken {
            reader.complete(false);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().buf.len()
    }
}
