//! Client bidirectional stream
//!
//! Two independent sides share one connect:
//!
//! ```text
//!   read:  Init → Connecting → Reading ⟲ → Finishing → Finished
//!   write: Init → Connecting → Idle ⇄ Writing → Finishing → Finished
//! ```
//!
//! `close` moves each side with an operation in flight to `Canceling` and
//! every other side to `Finished`. The call retires once both sides are
//! `Finished`, which is only after every issued operation has completed.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use cqrpc_core::{CallError, ClientReaderWriter, ConnectContext, Error, Handler, Op, Result};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::callbacks::StreamCallbacks;
use crate::inbound::ReadStatus;
use crate::outbound::{Outbound, WriteSide, WriteStatus};

struct BidiState<W, R> {
    read: ReadStatus,
    write: WriteSide<W>,
    stream: Option<Box<dyn ClientReaderWriter<W, R>>>,
    callbacks: StreamCallbacks<R>,
    closed: bool,
    retired: bool,
}

/// Bidirectional call
pub struct BidiStream<W, R> {
    slot: CallSlot,
    state: Mutex<BidiState<W, R>>,
}

impl<W: Send + 'static, R: Send + 'static> BidiStream<W, R> {
    pub(crate) fn new(slot: CallSlot, callbacks: StreamCallbacks<R>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            state: Mutex::new(BidiState {
                read: ReadStatus::Init,
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
        C: FnOnce(ConnectContext) -> Box<dyn ClientReaderWriter<W, R>>,
    {
        let mut state = self.state.lock();
        if state.read != ReadStatus::Init || state.closed {
            return;
        }
        state.read = ReadStatus::Connecting;
        state.write.status = WriteStatus::Connecting;
        let ctx = ConnectContext {
            queue: Arc::clone(self.slot.queue()),
            tag: self.slot.tag(Op::Connect),
        };
        state.stream = Some(connect(ctx));
    }

    /// Queue a message; returns its id
    ///
    /// Messages reach the transport in the order they were written. Fails
    /// with [`Error::WritesDone`] after [`writes_done`](Self::writes_done)
    /// and with [`Error::Closed`] once the call is closed.
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

    /// Half-close the outbound direction after everything already written
    ///
    /// Idempotent.
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

    fn issue_next_write(&self, state: &mut BidiState<W, R>) {
        let tag = self.slot.tag(Op::Write);
        let next = state.write.next_op();
        if let (Some(op), Some(stream)) = (next, state.stream.as_mut()) {
            match op {
                Outbound::Message { msg, .. } => stream.write(msg, tag),
                Outbound::Done => stream.writes_done(tag),
            }
        }
    }

    fn close_locked(&self, state: &mut BidiState<W, R>) {
        if state.closed {
            return;
        }
        state.closed = true;

        if state.read.is_pending() || state.write.status.is_pending() {
            if let Some(stream) = state.stream.as_mut() {
                stream.try_cancel();
            }
        }
        state.read = if state.read.is_pending() {
            ReadStatus::Canceling
        } else {
            ReadStatus::Finished
        };
        state.write.cancel();
    }

    /// Retire once both sides are finished; drops leftovers unlocked
    fn finish_locked(&self, mut state: MutexGuard<'_, BidiState<W, R>>) {
        if state.read != ReadStatus::Finished
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

    /// Deliver the single error outcome and close
    fn fail(&self, mut state: MutexGuard<'_, BidiState<W, R>>, kind: CallError) {
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

    fn proceed_connect(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.read != ReadStatus::Connecting || state.write.status != WriteStatus::Connecting {
            // Closed while connecting
            state.read = ReadStatus::Finished;
            state.write.status = WriteStatus::Finished;
            self.finish_locked(state);
            return;
        }

        if !ok {
            tracing::error!(key = %self.slot.key(), "connection failed");
            state.read = ReadStatus::Finished;
            state.write.status = WriteStatus::Finished;
            self.fail(state, CallError::Connect);
            return;
        }

        if let Some(stream) = state.stream.as_mut() {
            stream.read(self.slot.tag(Op::Read));
        }
        state.read = ReadStatus::Reading;
        self.issue_next_write(&mut state);

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

                // The status ends the call, whatever the write side was doing
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
                // Half-close acknowledged; the read side ends the call
                state.write.status = WriteStatus::Finished;
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
}

impl<W: Send + 'static, R: Send + 'static> Handler for BidiStream<W, R> {
    fn proceed(&self, op: Op, ok: bool) {
        match op {
            Op::Connect => self.proceed_connect(ok),
            Op::Read | Op::Finish => self.proceed_read(op, ok),
            Op::Write => self.proceed_write(ok),
            _ => tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for stream"),
        }
    }
}

impl<W: Send + 'static, R: Send + 'static> Closeable for BidiStream<W, R> {
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
