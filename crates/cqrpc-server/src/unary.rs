//! Unary responder
//!
//! ```text
//! Listening --accept--> Idle --finish()--> (notify) --> Finishing --> Finished
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cqrpc_core::{
    AcceptSlot, CompletionQueue, Handler, IncomingUnary, Op, Result, Status, UnaryResponder,
};
use cqrpc_runtime::{run_callback, CallSlot, Closeable};

use crate::acceptor::{respawn, Acceptor, Spawn};
use crate::context::{UnaryContext, UnarySink};
use crate::handler::UnaryHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Listening,
    Idle,
    Finishing,
    Finished,
}

enum Reply<W> {
    Message(W, Status),
    Error(Status),
}

struct UnaryState<W, Q> {
    phase: Phase,
    accept: Option<Arc<AcceptSlot<IncomingUnary<Q, W>>>>,
    responder: Option<Box<dyn UnaryResponder<W>>>,
    reply: Option<Reply<W>>,
    notify_pending: bool,
    closed: bool,
    retired: bool,
}

/// Server side of one unary call
pub struct UnaryServerCall<H: UnaryHandler> {
    slot: CallSlot,
    me: Weak<Self>,
    spawner: Arc<UnarySpawner<H>>,
    shutdown: Arc<AtomicBool>,
    handler: Mutex<H>,
    state: Mutex<UnaryState<H::Response, H::Request>>,
}

impl<H: UnaryHandler> UnaryServerCall<H> {
    fn new(
        slot: CallSlot,
        handler: H,
        spawner: Arc<UnarySpawner<H>>,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            slot,
            me: Weak::clone(me),
            spawner,
            shutdown,
            handler: Mutex::new(handler),
            state: Mutex::new(UnaryState {
                phase: Phase::Listening,
                accept: None,
                responder: None,
                reply: None,
                notify_pending: false,
                closed: false,
                retired: false,
            }),
        })
    }

    /// Create the accept slot and let the handler register it
    fn request(&self) {
        let accept = AcceptSlot::new(Arc::clone(self.slot.queue()), self.slot.tag(Op::Accept));
        {
            let mut state = self.state.lock();
            if state.closed {
                // Closed by shutdown before it ever listened
                state.phase = Phase::Finished;
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

    fn retire_if_done(&self, state: &mut UnaryState<H::Response, H::Request>) {
        if state.phase != Phase::Finished || state.notify_pending || state.retired {
            return;
        }
        state.retired = true;
        state.accept = None;
        state.responder = None;
        self.slot.retire();
    }

    fn proceed_accept(&self, ok: bool) {
        let mut state = self.state.lock();
        let incoming = state.accept.take().and_then(|a| a.take());

        if state.closed || self.shutting_down() || !ok {
            if !ok && !state.closed && !self.shutting_down() {
                tracing::error!(key = %self.slot.key(), "accept failed");
            }
            state.phase = Phase::Finished;
            self.retire_if_done(&mut state);
            drop(state);
            // Drops the transport side, if one arrived
            drop(incoming);
            return;
        }

        let Some(IncomingUnary { request, responder }) = incoming else {
            tracing::warn!(key = %self.slot.key(), "accept completed without a call");
            state.phase = Phase::Finished;
            self.retire_if_done(&mut state);
            return;
        };
        state.responder = Some(responder);
        state.phase = Phase::Idle;
        drop(state);

        // Next caller gets a fresh responder, whatever this one does
        respawn(Arc::clone(&self.spawner) as Arc<dyn Spawn>, self.slot.queue());

        let sink: Weak<dyn UnarySink<H::Response>> = self.me.clone();
        let ctx = UnaryContext::new(sink);
        let mut handler = self.handler.lock();
        run_callback("on_accept", || handler.on_accept(&ctx, request));
    }

    fn proceed_notify(&self) {
        let mut state = self.state.lock();
        state.notify_pending = false;
        if state.closed || state.phase != Phase::Idle {
            self.retire_if_done(&mut state);
            return;
        }

        let tag = self.slot.tag(Op::Finish);
        let reply = state.reply.take();
        let issued = match (reply, state.responder.as_mut()) {
            (Some(Reply::Message(msg, status)), Some(responder)) => {
                responder.finish(msg, status, tag);
                true
            }
            (Some(Reply::Error(status)), Some(responder)) => {
                responder.finish_with_error(status, tag);
                true
            }
            _ => false,
        };
        if issued {
            state.phase = Phase::Finishing;
        } else {
            tracing::warn!(key = %self.slot.key(), "notified without a reply");
            state.phase = Phase::Finished;
            self.retire_if_done(&mut state);
        }
    }

    fn proceed_finish(&self, ok: bool) {
        let mut state = self.state.lock();
        if !ok && !state.closed {
            tracing::error!(key = %self.slot.key(), "finish failed");
        } else {
            tracing::trace!(key = %self.slot.key(), ok, "unary call finished");
        }
        state.phase = Phase::Finished;
        self.retire_if_done(&mut state);
    }

    fn submit(&self, reply: Reply<H::Response>) {
        let mut state = self.state.lock();
        if self.shutting_down()
            || state.closed
            || state.phase != Phase::Idle
            || state.reply.is_some()
        {
            return;
        }
        state.reply = Some(reply);
        state.notify_pending = true;
        self.slot.post(Op::Notify, true);
    }
}

impl<H: UnaryHandler> UnarySink<H::Response> for UnaryServerCall<H> {
    fn finish(&self, msg: H::Response, status: Status) {
        self.submit(Reply::Message(msg, status));
    }

    fn finish_with_error(&self, status: Status) {
        self.submit(Reply::Error(status));
    }
}

impl<H: UnaryHandler> Handler for UnaryServerCall<H> {
    fn proceed(&self, op: Op, ok: bool) {
        match op {
            Op::Accept => self.proceed_accept(ok),
            Op::Notify => self.proceed_notify(),
            Op::Finish => self.proceed_finish(ok),
            _ => tracing::warn!(key = %self.slot.key(), %op, "unexpected completion for unary responder"),
        }
    }
}

impl<H: UnaryHandler> Closeable for UnaryServerCall<H> {
    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.reply = None;

        match state.phase {
            Phase::Listening => {
                // Either way exactly one accept completion is on its way
                if let Some(accept) = state.accept.as_ref() {
                    accept.cancel();
                }
            }
            Phase::Idle => {
                if let Some(responder) = state.responder.as_mut() {
                    responder.try_cancel();
                }
                state.phase = Phase::Finished;
                self.retire_if_done(&mut state);
            }
            Phase::Finishing => {
                if let Some(responder) = state.responder.as_mut() {
                    responder.try_cancel();
                }
            }
            Phase::Finished => {}
        }
    }
}

/// Spawns unary responders for one registered handler
pub(crate) struct UnarySpawner<H> {
    acceptor: Acceptor<H>,
}

impl<H: UnaryHandler> UnarySpawner<H> {
    pub(crate) fn new(acceptor: Acceptor<H>) -> Arc<Self> {
        Arc::new(Self { acceptor })
    }
}

impl<H: UnaryHandler> Spawn for UnarySpawner<H> {
    fn spawn(self: Arc<Self>, queue: &Arc<CompletionQueue>) -> Result<()> {
        let engine = self.acceptor.engine()?;
        let handler = self.acceptor.make_handler();
        let shutdown = engine.shutdown_flag();
        let call = engine.spawn_call(Some(queue), |slot| {
            UnaryServerCall::new(slot, handler, Arc::clone(&self), shutdown)
        })?;
        call.request();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fake, Times100};
    use cqrpc_runtime::{Engine, ManagerConfig};

    #[test]
    fn test_closed_before_request_never_listens() {
        let fake = Fake::new();
        let engine = Arc::new(Engine::new("test", ManagerConfig::default().threads(1)).unwrap());
        engine.start().unwrap();
        let queue = Arc::clone(&engine.queues().unwrap()[0]);

        let f = fake.clone();
        let spawner = UnarySpawner::new(Acceptor::new(Arc::downgrade(&engine), move || {
            Times100 { fake: f.clone() }
        }));
        let shutdown = engine.shutdown_flag();
        let call = engine
            .spawn_call(Some(&queue), |slot| {
                UnaryServerCall::new(slot, Times100 { fake: fake.clone() }, spawner, shutdown)
            })
            .unwrap();

        call.close();
        call.request();
        assert_eq!(fake.waiting_unary(), 0);
        assert_eq!(engine.live_calls(), 0);
        engine.shutdown();
    }
}
