//! Alarm: a scheduled callback bound to an event loop
//!
//! Every arming produces exactly one `Op::Alarm` completion: `ok = true`
//! from the timer thread at the deadline, or `ok = false` posted by whoever
//! cancelled the timer while it was still pending. Completions are matched
//! to armings in FIFO order. Only the current, uncancelled arming can
//! receive a completion out of its own timer, so the callback of a
//! cancelled arming never runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cqrpc_core::{Handler, Op};

use crate::callback::run_callback;
use crate::handle::CallSlot;
use crate::registry::Closeable;
use crate::timer::{TimerHandle, TimerService};

/// Alarm callback, run at most once per arming
pub type AlarmCallback = Box<dyn FnOnce() + Send>;

struct Arming {
    handle: TimerHandle,
    cancelled: bool,
    callback: AlarmCallback,
}

#[derive(Default)]
struct AlarmState {
    armings: VecDeque<Arming>,
    closed: bool,
    retired: bool,
}

pub struct Alarm {
    slot: CallSlot,
    timers: Arc<TimerService>,
    state: Mutex<AlarmState>,
}

impl Alarm {
    pub fn new(slot: CallSlot, timers: Arc<TimerService>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            timers,
            state: Mutex::new(AlarmState::default()),
        })
    }

    /// Arm `callback` to run after `after`, cancelling any current arming
    ///
    /// Returns false once the alarm is closed.
    pub fn set<F>(&self, after: Duration, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        self.cancel_locked(&mut state);

        let handle = self
            .timers
            .schedule(Arc::clone(self.slot.queue()), self.slot.tag(Op::Alarm), after);
        state.armings.push_back(Arming {
            handle,
            cancelled: false,
            callback: Box::new(callback),
        });
        tracing::trace!(key = %self.slot.key(), ?after, "alarm set");
        true
    }

    /// Cancel the current arming, if any; the alarm stays usable
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        self.cancel_locked(&mut state);
    }

    fn cancel_locked(&self, state: &mut AlarmState) {
        for arming in state.armings.iter_mut().filter(|a| !a.cancelled) {
            arming.cancelled = true;
            // Otherwise the timer thread already took it and posts `true` itself
            if self.timers.cancel(arming.handle) {
                self.slot.post(Op::Alarm, false);
            }
        }
    }

    /// Whether an uncancelled arming is pending
    pub fn is_armed(&self) -> bool {
        self.state.lock().armings.iter().any(|a| !a.cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Index of the event loop this alarm fires on
    pub fn queue_id(&self) -> usize {
        self.slot.queue().id()
    }

    /// Retire once closed with nothing left to drain
    fn retire_if_drained(&self) {
        let retire = {
            let mut state = self.state.lock();
            let drained = state.closed && state.armings.is_empty() && !state.retired;
            if drained {
                state.retired = true;
            }
            drained
        };
        if retire {
            self.slot.retire();
        }
    }
}

impl Handler for Alarm {
    fn proceed(&self, op: Op, ok: bool) {
        if op != Op::Alarm {
            tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for alarm");
            return;
        }

        let arming = self.state.lock().armings.pop_front();
        match arming {
            Some(arming) if ok && !arming.cancelled => {
                run_callback("alarm", arming.callback);
            }
            Some(arming) => {
                tracing::trace!(key = %self.slot.key(), ok, "alarm cancelled");
                drop(arming);
            }
            None => {
                tracing::warn!(key = %self.slot.key(), ok, "alarm completion with no arming");
            }
        }

        self.retire_if_drained();
    }
}

impl Closeable for Alarm {
    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.cancel_locked(&mut state);
        }
        self.retire_if_drained();
    }
}
