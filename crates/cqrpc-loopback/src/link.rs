//! Streaming loopback call
//!
//! Two pipes (client to server and back) plus the terminal status. The
//! client end implements every client streaming trait; the server end
//! implements [`ServerReaderWriter`]. Dropping either end before a status
//! was set aborts the call.

use std::sync::Arc;

use parking_lot::Mutex;

use cqrpc_core::{
    ClientReader, ClientReaderWriter, ClientWriter, CompletionQueue, ConnectContext,
    ServerReaderWriter, Status, Tag,
};

use crate::pipe::{Pipe, Waiter};

struct Terminal {
    status: Option<Status>,
    /// Client finish waiting for the status
    waiter: Option<Waiter>,
}

pub(crate) struct Link<Q, P> {
    up: Pipe<Q>,
    down: Pipe<P>,
    terminal: Mutex<Terminal>,
    /// Queue of the responder that accepted the call
    server_queue: Mutex<Option<Arc<CompletionQueue>>>,
}

impl<Q, P> Link<Q, P> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            up: Pipe::new(),
            down: Pipe::new(),
            terminal: Mutex::new(Terminal {
                status: None,
                waiter: None,
            }),
            server_queue: Mutex::new(None),
        })
    }

    pub(crate) fn bind_server(&self, queue: Arc<CompletionQueue>) {
        *self.server_queue.lock() = Some(queue);
    }

    fn server_waiter(&self, tag: Tag) -> Option<Waiter> {
        let queue = self.server_queue.lock().clone();
        if queue.is_none() {
            tracing::error!(%tag, "server end used before it was accepted");
        }
        queue.map(|q| Waiter::new(q, tag))
    }

    fn is_finished(&self) -> bool {
        self.terminal.lock().status.is_some()
    }

    /// Record the status; false if one was already set
    fn set_status(&self, status: Status) -> bool {
        let waiter = {
            let mut terminal = self.terminal.lock();
            if terminal.status.is_some() {
                return false;
            }
            terminal.status = Some(status);
            terminal.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.complete(true);
        }
        true
    }

    /// End the call with `status` and fail everything in flight
    pub(crate) fn abort(&self, status: Status) {
        self.set_status(status);
        self.up.cancel();
        self.down.cancel();
    }
}

/// Client end of a streaming call
///
/// Implements the reader, writer and bidirectional client traits over the
/// same link.
pub(crate) struct LoopbackStream<Q, P> {
    queue: Arc<CompletionQueue>,
    link: Arc<Link<Q, P>>,
}

impl<Q, P> LoopbackStream<Q, P> {
    pub(crate) fn new(ctx: &ConnectContext, link: Arc<Link<Q, P>>) -> Self {
        Self {
            queue: Arc::clone(&ctx.queue),
            link,
        }
    }

    fn waiter(&self, tag: Tag) -> Waiter {
        Waiter::new(Arc::clone(&self.queue), tag)
    }

    /// Send the only request of a server-streaming call and half-close
    pub(crate) fn send_and_close(&mut self, request: Q) {
        self.link.up.send(request);
        self.link.up.close();
    }

    fn read_op(&mut self, tag: Tag) {
        self.link.down.read(self.waiter(tag));
    }

    fn write_op(&mut self, msg: Q, tag: Tag) {
        let ok = self.link.up.send(msg);
        self.waiter(tag).complete(ok);
    }

    fn writes_done_op(&mut self, tag: Tag) {
        self.link.up.close();
        self.waiter(tag).complete(true);
    }

    fn finish_op(&mut self, tag: Tag) {
        let waiter = self.waiter(tag);
        let mut terminal = self.link.terminal.lock();
        if terminal.status.is_some() {
            drop(terminal);
            waiter.complete(true);
        } else {
            terminal.waiter = Some(waiter);
        }
    }

    fn status(&self) -> Status {
        self.link
            .terminal
            .lock()
            .status
            .clone()
            .unwrap_or_else(|| Status::unavailable("call has not finished"))
    }

    fn cancel(&mut self) {
        self.link.abort(Status::cancelled());
    }
}

impl<Q, P> Drop for LoopbackStream<Q, P> {
    fn drop(&mut self) {
        if !self.link.is_finished() {
            self.link.abort(Status::cancelled());
        }
    }
}

impl<Q: Send, P: Send> ClientReader<P> for LoopbackStream<Q, P> {
    fn read(&mut self, tag: Tag) {
        self.read_op(tag);
    }

    fn take_read(&mut self) -> Option<P> {
        self.link.down.take_ready()
    }

    fn finish(&mut self, tag: Tag) {
        self.finish_op(tag);
    }

    fn take_status(&mut self) -> Status {
        self.status()
    }

    fn try_cancel(&mut self) {
        self.cancel();
    }
}

impl<Q: Send, P: Send> ClientWriter<Q, P> for LoopbackStream<Q, P> {
    fn write(&mut self, msg: Q, tag: Tag) {
        self.write_op(msg, tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.writes_done_op(tag);
    }

    fn finish(&mut self, tag: Tag) {
        self.finish_op(tag);
    }

    /// The single response is the first message the server wrote
    fn take_response(&mut self) -> Option<P> {
        self.link.down.take_buffered()
    }

    fn take_status(&mut self) -> Status {
        self.status()
    }

    fn try_cancel(&mut self) {
        self.cancel();
    }
}

impl<Q: Send, P: Send> ClientReaderWriter<Q, P> for LoopbackStream<Q, P> {
    fn read(&mut self, tag: Tag) {
        self.read_op(tag);
    }

    fn take_read(&mut self) -> Option<P> {
        self.link.down.take_ready()
    }

    fn write(&mut self, msg: Q, tag: Tag) {
        self.write_op(msg, tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.writes_done_op(tag);
    }

    fn finish(&mut self, tag: Tag) {
        self.finish_op(tag);
    }

    fn take_status(&mut self) -> Status {
        self.status()
    }

    fn try_cancel(&mut self) {
        self.cancel();
    }
}

/// Server end of a streaming call
pub(crate) struct ServerEnd<Q, P> {
    link: Arc<Link<Q, P>>,
}

impl<Q, P> ServerEnd<Q, P> {
    pub(crate) fn new(link: Arc<Link<Q, P>>) -> Self {
        Self { link }
    }
}

impl<Q: Send, P: Send> ServerReaderWriter<P, Q> for ServerEnd<Q, P> {
    fn read(&mut self, tag: Tag) {
        if let Some(waiter) = self.link.server_waiter(tag) {
            self.link.up.read(waiter);
        }
    }

    fn take_read(&mut self) -> Option<Q> {
        self.link.up.take_ready()
    }

    fn write(&mut self, msg: P, tag: Tag) {
        let ok = !self.link.is_finished() && self.link.down.send(msg);
        if let Some(waiter) = self.link.server_waiter(tag) {
            waiter.complete(ok);
        }
    }

    fn finish(&mut self, status: Status, tag: Tag) {
        let ok = self.link.set_status(status);
        if ok {
            self.link.down.close();
        }
        if let Some(waiter) = self.link.server_waiter(tag) {
            waiter.complete(ok);
        }
    }

    fn try_cancel(&mut self) {
        if self.link.is_finished() {
            // Messages already sent stay readable by the client
            self.link.up.cancel();
        } else {
            self.link.abort(Status::cancelled());
        }
    }
}

impl<Q, P> Drop for ServerEnd<Q, P> {
    fn drop(&mut self) {
        if !self.link.is_finished() {
            self.link.abort(Status::unavailable("call dropped by the server"));
        }
    }
}
