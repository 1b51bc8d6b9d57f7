//! Client client-streaming call
//!
//! A stream of requests, then a single response. Once the half-close has
//! been acknowledged the call asks for the response with `finish`.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use cqrpc_core::{CallError, ClientWriter, ConnectContext, Error, Handler, Op, Result, Status};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::callbacks::WriterCallbacks;
use crate::outbound::{Outbound, WriteSide, WriteStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseStatus {
    Init,
    Connecting,
    /// Connected; `finish` is issued after the half-close
    Waiting,
    Finishing,
    Canceling,
    Finished,
}

impl ResponseStatus {
    fn is_pending(self) -> bool {
        matches!(self, ResponseStatus::Connecting | ResponseStatus::Finishing)
    }
}

struct WriterState<W, R> {
    response: ResponseStatus,
    write: WriteSide<W>,
    stream: Option<Box<dyn ClientWriter<W, R>>>,
    callbacks: WriterCallbacks<R>,
    closed: bool,
    retired: bool,
}

/// Client-streaming call
pub struct ClientStreamWriter<W, R> {
    slot: CallSlot,
    state: Mutex<WriterState<W, R>>,
}

impl<W: Send + 'static, R: Default + Send + 'static> ClientStreamWriter<W, R> {
    pub(crate) fn new(slot: CallSlot, callbacks: WriterCallbacks<R>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            state: Mutex::new(WriterState {
                response: ResponseStatus::Init,
                write: WriteSide::new(),
                stream: None,
                callbacks,
                closed: false,
                retired: false,
            }),
        })
    }

    pub(crate) fn start<C>(&self, connect: C)
    where
        C: FnOnce(ConnectContext) -> Box<dyn ClientWriter<W, R>>,
    {
        let mut state = self.state.lock();
        if state.response != ResponseStatus::Init || state.closed {
            return;
        }
        state.response = ResponseStatus::Connecting;
        state.write.status = WriteStatus::Connecting;
        let ctx = ConnectContext {
            queue: Arc::clone(self.slot.queue()),
            tag: self.slot.tag(Op::Connect),
        };
        state.stream = Some(connect(ctx));
    }

    /// Queue a message; returns its id
    pub fn write(&self, msg: W) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let id = state.write.push(msg)?;
        if state.write.status == WriteStatus::Idle {
            self.issue_next_write(&mut state);
        }
        Ok(id)
    }

    /// Half-close; the response is requested once this is acknowledged
    pub fn writes_done(&self) {
        let mut state = self.state.lock();
        if state.closed || !state.write.push_done() {
            return;
        }
        if state.write.status == WriteStatus::Idle {
            self.issue_next_write(&mut state);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn issue_next_write(&self, state: &mut WriterState<W, R>) {
        let tag = self.slot.tag(Op::Write);
        let next = state.write.next_op();
        if let (Some(op), Some(stream)) = (next, state.stream.as_mut()) {
            match op {
                Outbound::Message { msg, .. } => stream.write(msg, tag),
                Outbound::Done => stream.writes_done(tag),
            }
        }
    }

    fn close_locked(&self, state: &mut WriterState<W, R>) {
        if state.closed {
            return;
        }
        state.closed = true;

        // Connected and idle is still a live call until its status is taken
        if state.response != ResponseStatus::Finished {
            if let Some(stream) = state.stream.as_mut() {
                stream.try_cancel();
            }
        }
        state.response = if state.response.is_pending() {
            ResponseStatus::Canceling
        } else {
            ResponseStatus::Finished
        };
        state.write.cancel();
    }

    fn finish_locked(&self, mut state: MutexGuard<'_, WriterState<W, R>>) {
        if state.response != ResponseStatus::Finished
            || state.write.status != WriteStatus::Finished
            || state.retired
        {
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

    fn fail(&self, mut state: MutexGuard<'_, WriterState<W, R>>, kind: CallError) {
        self.close_locked(&mut state);
        let callbacks = std::mem::take(&mut state.callbacks);
        drop(state);
        if let Some(f) = callbacks.on_error {
            run_callback("on_error", move || f(kind));
        }

        let state = self.state.lock();
        self.finish_locked(state);
    }

    fn proceed_connect(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.response != ResponseStatus::Connecting {
            state.response = ResponseStatus::Finished;
            state.write.status = WriteStatus::Finished;
            self.finish_locked(state);
            return;
        }

        if !ok {
            tracing::error!(key = %self.slot.key(), "connection failed");
            state.response = ResponseStatus::Finished;
            state.write.status = WriteStatus::Finished;
            self.fail(state, CallError::Connect);
            return;
        }

        state.response = ResponseStatus::Waiting;
        self.issue_next_write(&mut state);

        let on_connect = state.callbacks.on_connect.take();
        drop(state);
        if let Some(f) = on_connect {
            run_callback("on_connect", f);
        }
    }

    fn proceed_write(&self, ok: bool) {
        let mut state = self.state.lock();
        match state.write.status {
            WriteStatus::Canceling => {
                state.write.status = WriteStatus::Finished;
                self.finish_locked(state);
            }
            WriteStatus::Writing | WriteStatus::Finishing if !ok => {
                tracing::error!(key = %self.slot.key(), "write failed");
                state.write.status = WriteStatus::Finished;
                self.fail(state, CallError::Write);
            }
            WriteStatus::Finishing => {
                state.write.status = WriteStatus::Finished;
                if let Some(stream) = state.stream.as_mut() {
                    stream.finish(self.slot.tag(Op::Finish));
                }
                state.response = ResponseStatus::Finishing;

                let on_writes_done = state.callbacks.write.on_writes_done.take();
                drop(state);
                if let Some(f) = on_writes_done {
                    run_callback("on_writes_done", f);
                }
            }
            WriteStatus::Writing => {
                let id = state.write.complete_message();
                self.issue_next_write(&mut state);

                let Some(id) = id else {
                    return;
                };
                let Some(mut on_write) = state.callbacks.write.on_write.take() else {
                    return;
                };
                drop(state);
                run_callback("on_write", || on_write(id));

                let mut state = self.state.lock();
                if !state.closed {
                    state.callbacks.write.on_write = Some(on_write);
                }
            }
            status => {
                tracing::warn!(key = %self.slot.key(), ?status, ok, "unexpected write completion");
            }
        }
    }

    fn proceed_finish(&self, ok: bool) {
        let mut state = self.state.lock();
        match state.response {
            ResponseStatus::Canceling => {
                state.response = ResponseStatus::Finished;
                self.finish_locked(state);
            }
            ResponseStatus::Finishing if !ok => {
                tracing::error!(key = %self.slot.key(), "finish failed");
                state.response = ResponseStatus::Finished;
                self.fail(state, CallError::Finish);
            }
            ResponseStatus::Finishing => {
                state.response = ResponseStatus::Finished;
                let (response, status) = match state.stream.as_mut() {
                    Some(stream) => (
                        stream.take_response().unwrap_or_default(),
                        stream.take_status(),
                    ),
                    None => (R::default(), Status::unavailable("no stream")),
                };
                if status.is_ok() {
                    tracing::debug!(key = %self.slot.key(), "write stream finished");
                } else {
                    tracing::error!(key = %self.slot.key(), %status, "call failed");
                }

                self.close_locked(&mut state);
                let callbacks = std::mem::take(&mut state.callbacks);
                drop(state);
                if let Some(f) = callbacks.on_done {
                    run_callback("on_done", move || f(response, status));
                }

                let state = self.state.lock();
                self.finish_locked(state);
            }
            response => {
                tracing::warn!(key = %self.slot.key(), ?response, ok, "unexpected finish completion");
            }
        }
    }
}

impl<W: Send + 'static, R: Default + Send + 'static> Handler for ClientStreamWriter<W, R> {
    fn proceed(&self, op: Op, ok: bool) {
        match op {
            Op::Connect => self.proceed_connect(ok),
            Op::Write => self.proceed_write(ok),
            Op::Finish => self.proceed_finish(ok),
            _ => tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for writer"),
        }
    }
}

impl<W: Send + 'static, R: Default + Send + 'static> Closeable for ClientStreamWriter<W, R> {
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
