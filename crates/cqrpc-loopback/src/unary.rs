//! Unary loopback call

use std::sync::Arc;

use parking_lot::Mutex;

use cqrpc_core::{CompletionQueue, Status, Tag, UnaryCall, UnaryResponder};

use crate::pipe::Waiter;

struct Outcome<P> {
    response: Option<P>,
    status: Option<Status>,
    waiter: Option<Waiter>,
}

pub(crate) struct UnaryLink<P> {
    outcome: Mutex<Outcome<P>>,
    server_queue: Mutex<Option<Arc<CompletionQueue>>>,
}

impl<P> UnaryLink<P> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Outcome {
                response: None,
                status: None,
                waiter: None,
            }),
            server_queue: Mutex::new(None),
        })
    }

    pub(crate) fn bind_server(&self, queue: Arc<CompletionQueue>) {
        *self.server_queue.lock() = Some(queue);
    }

    fn is_finished(&self) -> bool {
        self.outcome.lock().status.is_some()
    }

    /// Settle the call; false if it already was
    fn settle(&self, response: Option<P>, status: Status) -> bool {
        let waiter = {
            let mut outcome = self.outcome.lock();
            if outcome.status.is_some() {
                return false;
            }
            outcome.response = response;
            outcome.status = Some(status);
            outcome.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.complete(true);
        }
        true
    }

    fn complete_server(&self, tag: Tag, ok: bool) {
        match self.server_queue.lock().as_ref() {
            Some(queue) => queue.post(tag, ok),
            None => tracing::error!(%tag, "responder used before it was accepted"),
        }
    }
}

/// Client end of a unary call
pub(crate) struct LoopbackUnary<P> {
    queue: Arc<CompletionQueue>,
    link: Arc<UnaryLink<P>>,
    /// Connect failed; `finish` fails
    broken: bool,
}

impl<P> LoopbackUnary<P> {
    pub(crate) fn new(queue: Arc<CompletionQueue>, link: Arc<UnaryLink<P>>) -> Self {
        Self {
            queue,
            link,
            broken: false,
        }
    }

    pub(crate) fn broken(queue: Arc<CompletionQueue>) -> Self {
        Self {
            queue,
            link: UnaryLink::new(),
            broken: true,
        }
    }
}

impl<P: Send> UnaryCall<P> for LoopbackUnary<P> {
    fn finish(&mut self, tag: Tag) {
        let waiter = Waiter::new(Arc::clone(&self.queue), tag);
        if self.broken {
            waiter.complete(false);
            return;
        }
        let mut outcome = self.link.outcome.lock();
        if outcome.status.is_some() {
            drop(outcome);
            waiter.complete(true);
        } else {
            outcome.waiter = Some(waiter);
        }
    }

    fn take_response(&mut self) -> Option<P> {
        self.link.outcome.lock().response.take()
    }

    fn take_status(&mut self) -> Status {
        self.link
            .outcome
            .lock()
            .status
            .clone()
            .unwrap_or_else(|| Status::unavailable("call has not finished"))
    }

    fn try_cancel(&mut self) {
        self.link.settle(None, Status::cancelled());
    }
}

impl<P> Drop for LoopbackUnary<P> {
    fn drop(&mut self) {
        if !self.link.is_finished() {
            self.link.settle(None, Status::cancelled());
        }
    }
}

/// Server end of a unary call
pub(crate) struct LoopbackResponder<P> {
    link: Arc<UnaryLink<P>>,
}

impl<P> LoopbackResponder<P> {
    pub(crate) fn new(link: Arc<UnaryLink<P>>) -> Self {
        Self { link }
    }
}

impl<P: Send> UnaryResponder<P> for LoopbackResponder<P> {
    fn finish(&mut self, msg: P, status: Status, tag: Tag) {
        let ok = self.link.settle(Some(msg), status);
        self.link.complete_server(tag, ok);
    }

    fn finish_with_error(&mut self, status: Status, tag: Tag) {
        let ok = self.link.settle(None, status);
        self.link.complete_server(tag, ok);
    }

    fn try_cancel(&mut self) {
        self.link.settle(None, Status::cancelled());
    }
}

impl<P> Drop for LoopbackResponder<P> {
    fn drop(&mut self) {
        if !self.link.is_finished() {
            self.link.settle(None, Status::unavailable("call dropped by the server"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqrpc_core::{Code, Op, SlotKey};

    fn tag(op: Op) -> Tag {
        SlotKey::new(3, 0).tag(op)
    }

    fn pair() -> (
        Arc<CompletionQueue>,
        Arc<CompletionQueue>,
        LoopbackUnary<u32>,
        LoopbackResponder<u32>,
    ) {
        let client = Arc::new(CompletionQueue::new(0));
        let server = Arc::new(CompletionQueue::new(1));
        let link = UnaryLink::new();
        link.bind_server(Arc::clone(&server));
        let call = LoopbackUnary::new(Arc::clone(&client), Arc::clone(&link));
        (client, server, call, LoopbackResponder::new(link))
    }

    #[test]
    fn test_response_before_finish() {
        let (client, server, mut call, mut responder) = pair();
        responder.finish(7, Status::ok(), tag(Op::Finish));
        assert!(server.try_next().unwrap().ok);

        call.finish(tag(Op::Finish));
        assert!(client.try_next().unwrap().ok);
        assert_eq!(call.take_response(), Some(7));
        assert!(call.take_status().is_ok());
    }

    #[test]
    fn test_only_first_answer_counts() {
        let (_client, server, mut call, mut responder) = pair();
        responder.finish_with_error(Status::new(Code::Internal, "no"), tag(Op::Finish));
        responder.finish(1, Status::ok(), tag(Op::Finish));
        assert!(server.try_next().unwrap().ok);
        assert!(!server.try_next().unwrap().ok);
        assert_eq!(call.take_status().code(), Code::Internal);
        assert!(call.take_response().is_none());
    }

    #[test]
    fn test_cancel_completes_pending_finish() {
        let (client, _server, mut call, _responder) = pair();
        call.finish(tag(Op::Finish));
        assert!(client.try_next().is_none());
        call.try_cancel();
        assert!(client.try_next().unwrap().ok);
        assert_eq!(call.take_status().code(), Code::Cancelled);
    }

    #[test]
    fn test_dropped_responder_is_unavailable() {
        let (client, _server, mut call, responder) = pair();
        call.finish(tag(Op::Finish));
        drop(responder);
        assert!(client.try_next().unwrap().ok);
        assert_eq!(call.take_status().code(), Code::Unavailable);
    }

    #[test]
    fn test_broken_call_fails_finish() {
        let client = Arc::new(CompletionQueue::new(0));
        let mut call: LoopbackUnary<u32> = LoopbackUnary::broken(Arc::clone(&client));
        call.finish(tag(Op::Finish));
        assert!(!client.try_next().unwrap().ok);
    }
}
