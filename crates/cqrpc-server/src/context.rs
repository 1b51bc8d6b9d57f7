//! Back-references handed to handlers
//!
//! A context observes its call weakly: once the call has been released,
//! every method is a no-op. Requests are forwarded to the call's event loop;
//! none of them touches the transport on the calling thread.

use std::sync::Weak;

use cqrpc_core::Status;

pub(crate) trait UnarySink<W>: Send + Sync {
    fn finish(&self, msg: W, status: Status);
    fn finish_with_error(&self, status: Status);
}

pub(crate) trait StreamSink<W>: Send + Sync {
    fn write(&self, msg: W);
    fn finish(&self, status: Status);
}

/// Answers a unary call
pub struct UnaryContext<W> {
    sink: Weak<dyn UnarySink<W>>,
}

impl<W> UnaryContext<W> {
    pub(crate) fn new(sink: Weak<dyn UnarySink<W>>) -> Self {
        Self { sink }
    }

    /// Send the response; only the first finish of a call counts
    pub fn finish(&self, msg: W, status: Status) {
        if let Some(sink) = self.sink.upgrade() {
            sink.finish(msg, status);
        }
    }

    /// Finish without a response body
    pub fn finish_with_error(&self, status: Status) {
        if let Some(sink) = self.sink.upgrade() {
            sink.finish_with_error(status);
        }
    }

    /// Whether the call is still around
    pub fn is_live(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl<W> Clone for UnaryContext<W> {
    fn clone(&self) -> Self {
        Self {
            sink: Weak::clone(&self.sink),
        }
    }
}

/// Writes to a streaming call
///
/// Writes are sent in the order they were made. Writes after `finish` are
/// ignored.
pub struct StreamContext<W> {
    sink: Weak<dyn StreamSink<W>>,
}

impl<W> StreamContext<W> {
    pub(crate) fn new(sink: Weak<dyn StreamSink<W>>) -> Self {
        Self { sink }
    }

    pub fn write(&self, msg: W) {
        if let Some(sink) = self.sink.upgrade() {
            sink.write(msg);
        }
    }

    /// Send the terminal status after every queued write
    pub fn finish(&self, status: Status) {
        if let Some(sink) = self.sink.upgrade() {
            sink.finish(status);
        }
    }

    pub fn is_live(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl<W> Clone for StreamContext<W> {
    fn clone(&self) -> Self {
        Self {
            sink: Weak::clone(&self.sink),
        }
    }
}
