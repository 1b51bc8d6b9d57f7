//! Streaming responder
//!
//! The inbound side pulls one message at a time into the handler. The
//! outbound side drains a FIFO of writes and a final status. Writes and
//! finishes made by the application are queued here and issued from the
//! event loop after a notify event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use cqrpc_core::{
    AcceptSlot, CompletionQueue, Handler, IncomingStream, Op, Result, ServerReaderWriter, Status,
};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::acceptor::{respawn, Acceptor, Spawn};
use crate::context::{StreamContext, StreamSink};
use crate::handler::StreamHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    Listening,
    Reading,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePhase {
    Listening,
    Idle,
    Writing,
    Finishing,
    Finished,
}

enum Outgoing<W> {
    Message(W),
    Finish(Status),
}

struct StreamState<W, R> {
    read: ReadPhase,
    write: WritePhase,
    accept: Option<Arc<AcceptSlot<IncomingStream<W, R>>>>,
    stream: Option<Box<dyn ServerReaderWriter<W, R>>>,
    outbox: VecDeque<Outgoing<W>>,
    finish_requested: bool,
    status_sent: bool,
    notify_pending: bool,
    closed: bool,
    retired: bool,
}

/// Server side of one streaming call
pub struct StreamServerCall<H: StreamHandler> {
    slot: CallSlot,
    me: Weak<Self>,
    spawner: Arc<StreamSpawner<H>>,
    shutdown: Arc<AtomicBool>,
    handler: Mutex<H>,
    state: Mutex<StreamState<H::Response, H::Request>>,
}

type Guard<'a, H> =
    MutexGuard<'a, StreamState<<H as StreamHandler>::Response, <H as StreamHandler>::Request>>;

impl<H: StreamHandler> StreamServerCall<H> {
    fn new(
        slot: CallSlot,
        handler: H,
        spawner: Arc<StreamSpawner<H>>,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            slot,
            me: Weak::clone(me),
            spawner,
            shutdown,
            handler: Mutex::new(handler),
            state: Mutex::new(StreamState {
                read: ReadPhase::Listening,
                write: WritePhase::Listening,
                accept: None,
                stream: None,
                outbox: VecDeque::new(),
                finish_requested: false,
                status_sent: false,
                notify_pending: false,
                closed: false,
                retired: false,
            }),
        })
    }

    fn request(&self) {
        let accept = AcceptSlot::new(Arc::clone(self.slot.queue()), self.slot.tag(Op::Accept));
        {
            let mut state = self.state.lock();
            if state.closed {
                // Closed by shutdown before it ever listened
                state.read = ReadPhase::Finished;
                state.write = WritePhase::Finished;
                self.retire_if_done(&mut state);
                return;
            }
            state.accept = Some(Arc::clone(&accept));
        }
        let mut handler = self.handler.lock();
        run_callback("on_request", || handler.on_request(accept));
    }

    #[inline]
    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn context(&self) -> StreamContext<H::Response> {
        let sink: Weak<dyn StreamSink<H::Response>> = self.me.clone();
        StreamContext::new(sink)
    }

    fn retire_if_done(&self, state: &mut Guard<'_, H>) {
        if state.read != ReadPhase::Finished
            || state.write != WritePhase::Finished
            || state.notify_pending
            || state.retired
        {
            return;
        }
        state.retired = true;
        state.accept = None;
        state.stream = None;
        state.outbox.clear();
        self.slot.retire();
    }

    /// Stop the inbound side; a pending read is cancelled, not awaited
    fn stop_read(&self, state: &mut Guard<'_, H>) {
        match state.read {
            ReadPhase::Reading => {
                if let Some(stream) = state.stream.as_mut() {
                    stream.try_cancel();
                }
            }
            _ => state.read = ReadPhase::Finished,
        }
    }

    /// Stop the outbound side; a pending write is cancelled, not awaited
    fn stop_write(&self, state: &mut Guard<'_, H>) {
        state.outbox.clear();
        match state.write {
            WritePhase::Writing | WritePhase::Finishing => {
                if let Some(stream) = state.stream.as_mut() {
                    stream.try_cancel();
                }
            }
            _ => state.write = WritePhase::Finished,
        }
    }

    /// Issue the next queued write or the final status
    fn issue_next(&self, state: &mut Guard<'_, H>) {
        let state = &mut **state;
        let next = state.outbox.pop_front();
        let Some(stream) = state.stream.as_mut() else {
            return;
        };
        match next {
            Some(Outgoing::Message(msg)) => {
                stream.write(msg, self.slot.tag(Op::Write));
                state.write = WritePhase::Writing;
            }
            Some(Outgoing::Finish(status)) => {
                stream.finish(status, self.slot.tag(Op::Finish));
                state.write = WritePhase::Finishing;
            }
            None => state.write = WritePhase::Idle,
        }
    }

    fn proceed_accept(&self, ok: bool) {
        let mut state = self.state.lock();
        let incoming = state.accept.take().and_then(|a| a.take());

        if state.closed || self.shutting_down() || !ok {
            if !ok && !state.closed && !self.shutting_down() {
                tracing::error!(key = %self.slot.key(), "accept failed");
            }
            state.read = ReadPhase::Finished;
            state.write = WritePhase::Finished;
            self.retire_if_done(&mut state);
            drop(state);
            drop(incoming);
            return;
        }

        let Some(IncomingStream { stream }) = incoming else {
            tracing::warn!(key = %self.slot.key(), "accept completed without a call");
            state.read = ReadPhase::Finished;
            state.write = WritePhase::Finished;
            self.retire_if_done(&mut state);
            return;
        };
        state.stream = Some(stream);
        state.write = WritePhase::Idle;
        drop(state);

        respawn(Arc::clone(&self.spawner) as Arc<dyn Spawn>, self.slot.queue());

        let ctx = self.context();
        {
            let mut handler = self.handler.lock();
            run_callback("on_accept", || handler.on_accept(&ctx));
        }

        let mut state = self.state.lock();
        if state.closed {
            state.read = ReadPhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }
        state.read = ReadPhase::Reading;
        if let Some(stream) = state.stream.as_mut() {
            stream.read(self.slot.tag(Op::Read));
        }
    }

    fn proceed_read(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.closed || self.shutting_down() {
            state.read = ReadPhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }

        if !ok && state.status_sent {
            state.read = ReadPhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }

        let ctx = self.context();
        if !ok {
            drop(state);
            {
                let mut handler = self.handler.lock();
                run_callback("on_read_done_or_error", || handler.on_read_done_or_error(&ctx));
            }
            let mut state = self.state.lock();
            state.read = ReadPhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }

        let Some(msg) = state.stream.as_mut().and_then(|s| s.take_read()) else {
            tracing::warn!(key = %self.slot.key(), "read completed without a message");
            return;
        };
        drop(state);
        {
            let mut handler = self.handler.lock();
            run_callback("on_read", || handler.on_read(&ctx, msg));
        }

        let mut state = self.state.lock();
        if state.closed {
            state.read = ReadPhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }
        if let Some(stream) = state.stream.as_mut() {
            stream.read(self.slot.tag(Op::Read));
        }
    }

    fn proceed_notify(&self) {
        let mut state = self.state.lock();
        state.notify_pending = false;
        if state.closed || self.shutting_down() {
            self.retire_if_done(&mut state);
            return;
        }
        if state.write == WritePhase::Idle {
            self.issue_next(&mut state);
        }
    }

    fn proceed_write(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.closed || self.shutting_down() {
            state.write = WritePhase::Finished;
            self.retire_if_done(&mut state);
            return;
        }
        if !ok {
            tracing::error!(key = %self.slot.key(), "write failed");
            state.write = WritePhase::Finished;
            state.outbox.clear();
            self.stop_read(&mut state);
            self.retire_if_done(&mut state);
            return;
        }
        self.issue_next(&mut state);
    }

    fn proceed_finish(&self, ok: bool) {
        let mut state = self.state.lock();
        if !ok && !state.closed && !self.shutting_down() {
            tracing::error!(key = %self.slot.key(), "finish failed");
        } else {
            tracing::trace!(key = %self.slot.key(), ok, "stream finished");
        }
        state.write = WritePhase::Finished;
        state.status_sent = ok;
        // The status went out; nothing more will be read
        self.stop_read(&mut state);
        self.retire_if_done(&mut state);
    }

    fn enqueue(&self, item: Outgoing<H::Response>) {
        let mut state = self.state.lock();
        if self.shutting_down() || state.closed || state.finish_requested {
            return;
        }
        if !matches!(state.write, WritePhase::Idle | WritePhase::Writing) {
            return;
        }
        if matches!(item, Outgoing::Finish(_)) {
            state.finish_requested = true;
        }
        state.outbox.push_back(item);
        if state.write == WritePhase::Idle && !state.notify_pending {
            state.notify_pending = true;
            self.slot.post(Op::Notify, true);
        }
    }
}

impl<H: StreamHandler> StreamSink<H::Response> for StreamServerCall<H> {
    fn write(&self, msg: H::Response) {
        self.enqueue(Outgoing::Message(msg));
    }

    fn finish(&self, status: Status) {
        self.enqueue(Outgoing::Finish(status));
    }
}

impl<H: StreamHandler> Handler for StreamServerCall<H> {
    fn proceed(&self, op: Op, ok: bool) {
        match op {
            Op::Accept => self.proceed_accept(ok),
            Op::Read => self.proceed_read(ok),
            Op::Notify => self.proceed_notify(),
            Op::Write => self.proceed_write(ok),
            Op::Finish => self.proceed_finish(ok),
            _ => tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for stream responder"),
        }
    }
}

impl<H: StreamHandler> Closeable for StreamServerCall<H> {
    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        if state.stream.is_none() {
            // One accept completion is on its way whoever wins
            if let Some(accept) = state.accept.as_ref() {
                accept.cancel();
            }
            return;
        }
        // An idle call is still live on the wire until its status went out
        let pending = state.read == ReadPhase::Reading
            || matches!(state.write, WritePhase::Writing | WritePhase::Finishing);
        if !pending && !state.status_sent {
            if let Some(stream) = state.stream.as_mut() {
                stream.try_cancel();
            }
        }
        self.stop_read(&mut state);
        self.stop_write(&mut state);
        self.retire_if_done(&mut state);
    }
}

/// Spawns streaming responders for one registered handler
pub(crate) struct StreamSpawner<H> {
    acceptor: Acceptor<H>,
}

impl<H: StreamHandler> StreamSpawner<H> {
    pub(crate) fn new(acceptor: Acceptor<H>) -> Arc<Self> {
        Arc::new(Self { acceptor })
    }
}

impl<H: StreamHandler> Spawn for StreamSpawner<H> {
    fn spawn(self: Arc<Self>, queue: &Arc<CompletionQueue>) -> Result<()> {
        let engine = self.acceptor.engine()?;
        let handler = self.acceptor.make_handler();
        let shutdown = engine.shutdown_flag();
        let call = engine.spawn_call(Some(queue), |slot| {
            StreamServerCall::new(slot, handler, Arc::clone(&self), shutdown)
        })?;
        call.request();
        Ok(())
    }
}
