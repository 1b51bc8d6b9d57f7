//! Scripted transport for the client tests
//!
//! Operations are recorded and left pending until the test completes them
//! with [`Mock::complete`], so every interleaving can be driven by hand.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cqrpc_core::{
    ClientReader, ClientReaderWriter, ClientWriter, CompletionQueue, ConnectContext, Op, Status,
    Tag, UnaryCall,
};

/// Poll `f` until it holds, failing after five seconds
pub(crate) fn wait_until(mut f: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !f() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Assert that nothing arrives for a while
///
/// The test must still hold a sender, otherwise a dropped callback would
/// look like silence.
pub(crate) fn assert_silent<T: Debug>(rx: &mpsc::Receiver<T>) {
    match rx.recv_timeout(Duration::from_millis(100)) {
        Err(mpsc::RecvTimeoutError::Timeout) => {}
        other => panic!("expected no event, got {:?}", other),
    }
}

struct MockState {
    queue: Option<Arc<CompletionQueue>>,
    pending: Vec<Tag>,
    log: Vec<String>,
    inbox: VecDeque<i64>,
    response: Option<i64>,
    status: Status,
}

#[derive(Clone)]
pub(crate) struct Mock {
    state: Arc<Mutex<MockState>>,
}

impl Mock {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                queue: None,
                pending: Vec::new(),
                log: Vec::new(),
                inbox: VecDeque::new(),
                response: None,
                status: Status::ok(),
            })),
        }
    }

    fn attach(&self, ctx: ConnectContext, streaming: bool) -> Box<MockStream> {
        let mut state = self.state.lock();
        state.queue = Some(ctx.queue);
        // A unary call completes nothing for its connect tag
        if streaming {
            state.pending.push(ctx.tag);
        }
        state.log.push("connect".into());
        Box::new(MockStream { mock: self.clone() })
    }

    pub(crate) fn connect_unary(&self, ctx: ConnectContext) -> Box<dyn UnaryCall<i64>> {
        self.attach(ctx, false)
    }

    pub(crate) fn connect_reader(&self, ctx: ConnectContext) -> Box<dyn ClientReader<i64>> {
        self.attach(ctx, true)
    }

    pub(crate) fn connect_writer(&self, ctx: ConnectContext) -> Box<dyn ClientWriter<i64, i64>> {
        self.attach(ctx, true)
    }

    pub(crate) fn connect_bidi(
        &self,
        ctx: ConnectContext,
    ) -> Box<dyn ClientReaderWriter<i64, i64>> {
        self.attach(ctx, true)
    }

    pub(crate) fn push_inbound(&self, msg: i64) {
        self.state.lock().inbox.push_back(msg);
    }

    pub(crate) fn set_response(&self, response: i64) {
        self.state.lock().response = Some(response);
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.state.lock().status = status;
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub(crate) fn is_pending(&self, op: Op) -> bool {
        self.state.lock().pending.iter().any(|t| t.op == op)
    }

    /// Block until an operation of kind `op` has been issued
    pub(crate) fn wait_for(&self, op: Op) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.is_pending(op) {
            assert!(Instant::now() < deadline, "no pending {} operation", op);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Complete the pending operation of kind `op`
    pub(crate) fn complete(&self, op: Op, ok: bool) {
        self.wait_for(op);
        let (queue, tag) = {
            let mut state = self.state.lock();
            let pos = state
                .pending
                .iter()
                .position(|t| t.op == op)
                .expect("pending op");
            let tag = state.pending.remove(pos);
            (state.queue.clone().expect("connected"), tag)
        };
        queue.post(tag, ok);
    }

    fn issue(&self, entry: String, tag: Tag) {
        let mut state = self.state.lock();
        state.log.push(entry);
        state.pending.push(tag);
    }

    fn cancel(&self) {
        let (queue, pending) = {
            let mut state = self.state.lock();
            state.log.push("cancel".into());
            state.status = Status::cancelled();
            (state.queue.clone(), std::mem::take(&mut state.pending))
        };
        if let Some(queue) = queue {
            for tag in pending {
                queue.post(tag, tag.op == Op::Finish);
            }
        }
    }
}

pub(crate) struct MockStream {
    mock: Mock,
}

impl UnaryCall<i64> for MockStream {
    fn finish(&mut self, tag: Tag) {
        self.mock.issue("finish".into(), tag);
    }

    fn take_response(&mut self) -> Option<i64> {
        self.mock.state.lock().response.take()
    }

    fn take_status(&mut self) -> Status {
        self.mock.state.lock().status.clone()
    }

    fn try_cancel(&mut self) {
        self.mock.cancel();
    }
}

impl ClientReader<i64> for MockStream {
    fn read(&mut self, tag: Tag) {
        self.mock.issue("read".into(), tag);
    }

    fn take_read(&mut self) -> Option<i64> {
        self.mock.state.lock().inbox.pop_front()
    }

    fn finish(&mut self, tag: Tag) {
        self.mock.issue("finish".into(), tag);
    }

    fn take_status(&mut self) -> Status {
        self.mock.state.lock().status.clone()
    }

    fn try_cancel(&mut self) {
        self.mock.cancel();
    }
}

impl ClientWriter<i64, i64> for MockStream {
    fn write(&mut self, msg: i64, tag: Tag) {
        self.mock.issue(format!("write:{}", msg), tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.mock.issue("writes_done".into(), tag);
    }

    fn finish(&mut self, tag: Tag) {
        self.mock.issue("finish".into(), tag);
    }

    fn take_response(&mut self) -> Option<i64> {
        self.mock.state.lock().response.take()
    }

    fn take_status(&mut self) -> Status {
        self.mock.state.lock().status.clone()
    }

    fn try_cancel(&mut self) {
        self.mock.cancel();
    }
}

impl ClientReaderWriter<i64, i64> for MockStream {
    fn read(&mut self, tag: Tag) {
        self.mock.issue("read".into(), tag);
    }

    fn take_read(&mut self) -> Option<i64> {
        self.mock.state.lock().inbox.pop_front()
    }

    fn write(&mut self, msg: i64, tag: Tag) {
        self.mock.issue(format!("write:{}", msg), tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.mock.issue("writes_done".into(), tag);
    }

    fn finish(&mut self, tag: Tag) {
        self.mock.issue("finish".into(), tag);
    }

    fn take_status(&mut self) -> Status {
        self.mock.state.lock().status.clone()
    }

    fn try_cancel(&mut self) {
        self.mock.cancel();
    }
}
