//! In-memory transport for the server tests
//!
//! Every operation completes immediately: reads drain a scripted inbox and
//! then fail, writes and finishes are reported through a channel.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cqrpc_core::{
    AcceptSlot, Code, CompletionQueue, IncomingStream, IncomingUnary, ServerReaderWriter, Status,
    Tag, UnaryResponder,
};

use crate::context::{StreamContext, UnaryContext};
use crate::handler::{StreamAccept, StreamHandler, UnaryAccept, UnaryHandler};

type UnarySlot = Arc<AcceptSlot<IncomingUnary<i64, i64>>>;
type StreamSlot = Arc<AcceptSlot<IncomingStream<i64, i64>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Out {
    Message(i64),
    Status(Code),
}

#[derive(Default)]
struct FakeState {
    unary: Vec<UnarySlot>,
    stream: Vec<StreamSlot>,
    last_unary: Option<UnaryContext<i64>>,
    /// Streams whose handler saw the end of the inbound side
    ended: usize,
    cancels: usize,
}

#[derive(Clone, Default)]
pub(crate) struct Fake {
    state: Arc<Mutex<FakeState>>,
}

impl Fake {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn waiting_unary(&self) -> usize {
        let state = self.state.lock();
        state.unary.iter().filter(|s| !s.is_completed()).count()
    }

    pub(crate) fn waiting_stream(&self) -> usize {
        let state = self.state.lock();
        state.stream.iter().filter(|s| !s.is_completed()).count()
    }

    pub(crate) fn ended(&self) -> usize {
        self.state.lock().ended
    }

    /// Number of `try_cancel` calls seen by the streams
    pub(crate) fn cancels(&self) -> usize {
        self.state.lock().cancels
    }

    pub(crate) fn last_unary_context(&self) -> Option<UnaryContext<i64>> {
        self.state.lock().last_unary.clone()
    }

    fn next_slot<T>(&self, pick: impl Fn(&mut FakeState) -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(slot) = pick(&mut *self.state.lock()) {
                return slot;
            }
            assert!(Instant::now() < deadline, "no acceptor registered");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Deliver a unary call to the next waiting acceptor
    pub(crate) fn call_unary(&self, request: i64) -> mpsc::Receiver<(i64, Code)> {
        let (tx, rx) = mpsc::channel();
        let slot = self.next_slot(|state| {
            state.unary.retain(|s| !s.is_completed());
            (!state.unary.is_empty()).then(|| state.unary.remove(0))
        });
        let responder = FakeResponder {
            queue: Arc::clone(slot.queue()),
            tx,
        };
        let delivered = slot.fill(IncomingUnary {
            request,
            responder: Box::new(responder),
        });
        assert!(delivered.is_ok(), "acceptor cancelled");
        rx
    }

    /// Deliver a streaming call whose client sends `inbox` then half-closes
    pub(crate) fn call_stream(&self, inbox: Vec<i64>) -> mpsc::Receiver<Out> {
        let (tx, rx) = mpsc::channel();
        let slot = self.next_slot(|state| {
            state.stream.retain(|s| !s.is_completed());
            (!state.stream.is_empty()).then(|| state.stream.remove(0))
        });
        let stream = FakeStream {
            fake: self.clone(),
            queue: Arc::clone(slot.queue()),
            inbox: inbox.into(),
            current: None,
            tx,
        };
        let delivered = slot.fill(IncomingStream {
            stream: Box::new(stream),
        });
        assert!(delivered.is_ok(), "acceptor cancelled");
        rx
    }
}

struct FakeResponder {
    queue: Arc<CompletionQueue>,
    tx: mpsc::Sender<(i64, Code)>,
}

impl UnaryResponder<i64> for FakeResponder {
    fn finish(&mut self, msg: i64, status: Status, tag: Tag) {
        let _ = self.tx.send((msg, status.code()));
        self.queue.post(tag, true);
    }

    fn finish_with_error(&mut self, status: Status, tag: Tag) {
        let _ = self.tx.send((0, status.code()));
        self.queue.post(tag, true);
    }

    fn try_cancel(&mut self) {}
}

struct FakeStream {
    fake: Fake,
    queue: Arc<CompletionQueue>,
    inbox: VecDeque<i64>,
    current: Option<i64>,
    tx: mpsc::Sender<Out>,
}

impl ServerReaderWriter<i64, i64> for FakeStream {
    fn read(&mut self, tag: Tag) {
        self.current = self.inbox.pop_front();
        self.queue.post(tag, self.current.is_some());
    }

    fn take_read(&mut self) -> Option<i64> {
        self.current.take()
    }

    fn write(&mut self, msg: i64, tag: Tag) {
        let _ = self.tx.send(Out::Message(msg));
        self.queue.post(tag, true);
    }

    fn finish(&mut self, status: Status, tag: Tag) {
        let _ = self.tx.send(Out::Status(status.code()));
        self.queue.post(tag, true);
    }

    fn try_cancel(&mut self) {
        self.fake.state.lock().cancels += 1;
    }
}

/// Answers `request * 100`
pub(crate) struct Times100 {
    pub(crate) fake: Fake,
}

impl UnaryHandler for Times100 {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: UnaryAccept<Self>) {
        self.fake.state.lock().unary.push(accept);
    }

    fn on_accept(&mut self, ctx: &UnaryContext<i64>, request: i64) {
        self.fake.state.lock().last_unary = Some(ctx.clone());
        ctx.finish(request * 100, Status::ok());
    }
}

/// Replies once on accept, once per read, once at end of stream
pub(crate) struct StreamEcho {
    pub(crate) fake: Fake,
}

impl StreamHandler for StreamEcho {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.fake.state.lock().stream.push(accept);
    }

    fn on_accept(&mut self, ctx: &StreamContext<i64>) {
        ctx.write(0);
    }

    fn on_read(&mut self, ctx: &StreamContext<i64>, msg: i64) {
        ctx.write(msg * 10);
    }

    fn on_read_done_or_error(&mut self, ctx: &StreamContext<i64>) {
        ctx.write(-1);
        ctx.finish(Status::ok());
    }
}

/// Never answers; only records the end of the inbound side
pub(crate) struct Silent {
    pub(crate) fake: Fake,
}

impl StreamHandler for Silent {
    type Request = i64;
    type Response = i64;

    fn on_request(&mut self, accept: StreamAccept<Self>) {
        self.fake.state.lock().stream.push(accept);
    }

    fn on_read(&mut self, _ctx: &StreamContext<i64>, _msg: i64) {}

    fn on_read_done_or_error(&mut self, _ctx: &StreamContext<i64>) {
        self.fake.state.lock().ended += 1;
    }
}
