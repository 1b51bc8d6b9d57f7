//! Client unary call
//!
//! ```text
//!   Init ──start──► Requesting ──finish(ok)──► Done    (on_done)
//!                       │   └────finish(!ok)─► Done    (on_error Finish)
//!                     close
//!                       ▼
//!                   Canceling ──finish(*)────► Done    (no callback)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use cqrpc_core::{CallError, ConnectContext, Handler, Op, Status, UnaryCall};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::callbacks::{OnError, OnResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryStatus {
    Init,
    Requesting,
    Canceling,
    Done,
}

struct UnaryState<R> {
    status: UnaryStatus,
    call: Option<Box<dyn UnaryCall<R>>>,
    on_done: Option<OnResponse<R>>,
    on_error: Option<OnError>,
    retired: bool,
}

/// One request, one response plus status
pub struct UnaryClientCall<R> {
    slot: CallSlot,
    state: Mutex<UnaryState<R>>,
}

impl<R: Default + Send + 'static> UnaryClientCall<R> {
    pub(crate) fn new(slot: CallSlot, on_done: OnResponse<R>, on_error: OnError) -> Arc<Self> {
        Arc::new(Self {
            slot,
            state: Mutex::new(UnaryState {
                status: UnaryStatus::Init,
                call: None,
                on_done: Some(on_done),
                on_error: Some(on_error),
                retired: false,
            }),
        })
    }

    /// Send the request and ask for the response
    ///
    /// For a unary call the transport posts nothing for the connect tag;
    /// the only completion is the one for `finish`.
    pub(crate) fn start<Q, C>(&self, connect: C, request: Q)
    where
        C: FnOnce(ConnectContext, Q) -> Box<dyn UnaryCall<R>>,
    {
        let mut state = self.state.lock();
        if state.status != UnaryStatus::Init {
            return;
        }
        let ctx = ConnectContext {
            queue: Arc::clone(self.slot.queue()),
            tag: self.slot.tag(Op::Connect),
        };
        let mut call = connect(ctx, request);
        call.finish(self.slot.tag(Op::Finish));
        state.call = Some(call);
        state.status = UnaryStatus::Requesting;
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.state.lock().status,
            UnaryStatus::Canceling | UnaryStatus::Done
        )
    }

    /// Drop callbacks and transport, then free the slot
    fn retire(&self, mut state: parking_lot::MutexGuard<'_, UnaryState<R>>) {
        if state.retired {
            return;
        }
        state.retired = true;
        let leftovers = (
            state.call.take(),
            state.on_done.take(),
            state.on_error.take(),
        );
        drop(state);
        drop(leftovers);
        self.slot.retire();
    }
}

impl<R: Default + Send + 'static> Handler for UnaryClientCall<R> {
    fn proceed(&self, op: Op, ok: bool) {
        if op != Op::Finish {
            tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for unary call");
            return;
        }

        let mut state = self.state.lock();
        let previous = state.status;
        state.status = UnaryStatus::Done;

        if previous != UnaryStatus::Requesting {
            tracing::trace!(key = %self.slot.key(), ok, "unary call drained after cancel");
            self.retire(state);
            return;
        }

        if !ok {
            tracing::error!(key = %self.slot.key(), "unary finish failed");
            let on_error = state.on_error.take();
            drop(state);
            if let Some(f) = on_error {
                run_callback("on_error", move || f(CallError::Finish));
            }
        } else {
            let (response, status) = match state.call.as_mut() {
                Some(call) => (call.take_response().unwrap_or_default(), call.take_status()),
                None => (R::default(), Status::unavailable("no call")),
            };
            if !status.is_ok() {
                tracing::error!(key = %self.slot.key(), %status, "unary call failed");
            }
            let on_done = state.on_done.take();
            drop(state);
            if let Some(f) = on_done {
                run_callback("on_done", move || f(response, status));
            }
        }

        let state = self.state.lock();
        self.retire(state);
    }
}

impl<R: Default + Send + 'static> Closeable for UnaryClientCall<R> {
    fn close(&self) {
        let mut state = self.state.lock();
        let status = state.status;
        match status {
            UnaryStatus::Requesting => {
                if let Some(call) = state.call.as_mut() {
                    call.try_cancel();
                }
                state.status = UnaryStatus::Canceling;
            }
            UnaryStatus::Canceling => {}
            UnaryStatus::Init => {
                state.status = UnaryStatus::Done;
                self.retire(state);
            }
            UnaryStatus::Done => self.retire(state),
        }
    }
}
