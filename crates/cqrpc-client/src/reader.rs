//! Client server-streaming call
//!
//! Connect, then pull messages one after another until a read fails. A
//! failed read means the stream ended (or broke); `finish` then tells
//! which, and its status is the call's terminal outcome.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use cqrpc_core::{CallError, ClientReader, ConnectContext, Handler, Op};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::callbacks::StreamCallbacks;
use crate::inbound::ReadStatus;

struct ReaderState<R> {
    read: ReadStatus,
    stream: Option<Box<dyn ClientReader<R>>>,
    callbacks: StreamCallbacks<R>,
    closed: bool,
    retired: bool,
}

/// Server-streaming call: one request, a stream of responses
pub struct ServerStreamReader<R> {
    slot: CallSlot,
    state: Mutex<ReaderState<R>>,
}

impl<R: Send + 'static> ServerStreamReader<R> {
    pub(crate) fn new(slot: CallSlot, callbacks: StreamCallbacks<R>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            state: Mutex::new(ReaderState {
                read: ReadStatus::Init,
                stream: None,
                callbacks,
                closed: false,
                retired: false,
            }),
        })
    }

    pub(crate) fn start<Q, C>(&self, connect: C, request: Q)
    where
        C: FnOnce(ConnectContext, Q) -> Box<dyn ClientReader<R>>,
    {
        let mut state = self.state.lock();
        if state.read != ReadStatus::Init || state.closed {
            return;
        }
        state.read = ReadStatus::Connecting;
        let ctx = ConnectContext {
            queue: Arc::clone(self.slot.queue()),
            tag: self.slot.tag(Op::Connect),
        };
        state.stream = Some(connect(ctx, request));
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close_locked(&self, state: &mut ReaderState<R>) {
        if state.closed {
            return;
        }
        state.closed = true;
        if state.read.is_pending() {
            if let Some(stream) = state.stream.as_mut() {
                stream.try_cancel();
            }
            state.read = ReadStatus::Canceling;
        } else {
            state.read = ReadStatus::Finished;
        }
    }

    /// Free the slot once nothing is pending; drops leftovers unlocked
    fn finish_locked(&self, mut state: MutexGuard<'_, ReaderState<R>>) {
        if state.read != ReadStatus::Finished || state.retired {
            return;
        }
        state.retired = true;
        let leftovers = (
            state.stream.take(),
            std::mem::take(&mut state.callbacks),
        );
        drop(state);
        drop(leftovers);
        self.slot.retire();
    }

    fn proceed_connect(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.read != ReadStatus::Connecting {
            // Closed while connecting
            state.read = ReadStatus::Finished;
            self.finish_locked(state);
            return;
        }

        if !ok {
            tracing::error!(key = %self.slot.key(), "connection failed");
            state.read = ReadStatus::Finished;
            self.fail(state, CallError::Connect);
            return;
        }

        if let Some(stream) = state.stream.as_mut() {
            stream.read(self.slot.tag(Op::Read));
        }
        state.read = ReadStatus::Reading;

        let on_connect = state.callbacks.on_connect.take();
        drop(state);
        if let Some(f) = on_connect {
            run_callback("on_connect", f);
        }
    }

    fn proceed_read(&self, op: Op, ok: bool) {
        let mut state = self.state.lock();
        match (state.read, op) {
            (ReadStatus::Canceling, _) => {
                state.read = ReadStatus::Finished;
                self.finish_locked(state);
            }
            (ReadStatus::Reading, Op::Read) => {
                let msg = if ok {
                    state.stream.as_mut().and_then(|s| s.take_read())
                } else {
                    None
                };
                let Some(msg) = msg else {
                    if ok {
                        tracing::warn!(key = %self.slot.key(), "read completed without a message");
                    }
                    // Maybe a clean end of stream: finish tells
                    if let Some(stream) = state.stream.as_mut() {
                        stream.finish(self.slot.tag(Op::Finish));
                    }
                    state.read = ReadStatus::Finishing;
                    return;
                };
                if let Some(stream) = state.stream.as_mut() {
                    stream.read(self.slot.tag(Op::Read));
                }

                let Some(mut on_read) = state.callbacks.on_read.take() else {
                    return;
                };
                drop(state);
                run_callback("on_read", || on_read(msg));

                let mut state = self.state.lock();
                if !state.closed {
                    state.callbacks.on_read = Some(on_read);
                }
            }
            (ReadStatus::Finishing, Op::Finish) => {
                state.read = ReadStatus::Finished;
                if !ok {
                    // No status behind the failed read: the stream broke
                    tracing::error!(key = %self.slot.key(), "read failed");
                    self.fail(state, CallError::Read);
                    return;
                }
                let status = match state.stream.as_mut() {
                    Some(stream) => stream.take_status(),
                    None => return,
                };
                if status.is_ok() {
                    tracing::debug!(key = %self.slot.key(), "read finished");
                } else {
                    tracing::error!(key = %self.slot.key(), %status, "call failed");
                }

                self.close_locked(&mut state);
                let callbacks = std::mem::take(&mut state.callbacks);
                drop(state);
                if let Some(f) = callbacks.on_done {
                    run_callback("on_done", move || f(status));
                }
                drop(callbacks.on_read);

                let state = self.state.lock();
                self.finish_locked(state);
            }
            (read, op) => {
                tracing::warn!(key = %self.slot.key(), ?read, %op, ok, "unexpected completion");
            }
        }
    }

    /// Deliver the single error outcome and close
    fn fail(&self, mut state: MutexGuard<'_, ReaderState<R>>, kind: CallError) {
        self.close_locked(&mut state);
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);
        if let Some(f) = callbacks.on_error {
            run_callback("on_error", move || f(kind));
        }
        drop(callbacks.on_read);

        let state = self.state.lock();
        self.finish_locked(state);
    }
}

impl<R: Send + 'static> Handler for ServerStreamReader<R> {
    fn proceed(&self, op: Op, ok: bool) {
        match op {
            Op::Connect => self.proceed_connect(ok),
            Op::Read | Op::Finish => self.proceed_read(op, ok),
            _ => tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for reader"),
        }
    }
}

impl<R: Send + 'static> Closeable for ServerStreamReader<R> {
    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        self.close_locked(&mut state);
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);
        drop(callbacks);

        let state = self.state.lock();
        self.finish_locked(state);
    }
}
