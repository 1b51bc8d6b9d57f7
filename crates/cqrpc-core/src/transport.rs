//! Transport collaborator boundary
//!
//! The engine never frames, serializes, or moves bytes itself. It drives
//! call objects supplied by a transport through the traits below. The
//! contract every implementation must honor:
//!
//! - Each method taking a [`Tag`] starts one async operation that posts
//!   exactly one completion for that tag on the call's bound
//!   [`CompletionQueue`].
//! - Operations never complete synchronously into the caller; they post.
//! - `try_cancel` makes every pending operation complete promptly. Pending
//!   reads, writes and accepts fail (`ok = false`); a pending client-side
//!   finish succeeds with a `CANCELLED` status.
//!
//! Methods are called while the owning call holds its own lock, so an
//! implementation must not call back into the engine.

use std::sync::Arc;

use crate::queue::CompletionQueue;
use crate::status::Status;
use crate::tag::Tag;

/// Handed to a client `connect` function
#[derive(Debug, Clone)]
pub struct ConnectContext {
    /// Queue all operations of the new call complete on
    pub queue: Arc<CompletionQueue>,
    /// Tag the transport posts once the stream is established (or failed)
    pub tag: Tag,
}

/// Client side of a unary call
pub trait UnaryCall<R>: Send {
    /// Ask for the response and status; completes once both are known
    fn finish(&mut self, tag: Tag);

    /// Response received by a successful finish
    fn take_response(&mut self) -> Option<R>;

    fn take_status(&mut self) -> Status;

    fn try_cancel(&mut self);
}

/// Client side of a server-streaming call
pub trait ClientReader<R>: Send {
    /// Pull the next message; fails once the stream has ended
    fn read(&mut self, tag: Tag);

    fn take_read(&mut self) -> Option<R>;

    /// Collect the terminal status
    fn finish(&mut self, tag: Tag);

    fn take_status(&mut self) -> Status;

    fn try_cancel(&mut self);
}

/// Client side of a client-streaming call
pub trait ClientWriter<W, R>: Send {
    fn write(&mut self, msg: W, tag: Tag);

    /// Half-close the outbound direction
    fn writes_done(&mut self, tag: Tag);

    /// Collect the single response and terminal status
    fn finish(&mut self, tag: Tag);

    fn take_response(&mut self) -> Option<R>;

    fn take_status(&mut self) -> Status;

    fn try_cancel(&mut self);
}

/// Client side of a bidirectional call
pub trait ClientReaderWriter<W, R>: Send {
    fn read(&mut self, tag: Tag);

    fn take_read(&mut self) -> Option<R>;

    fn write(&mut self, msg: W, tag: Tag);

    fn writes_done(&mut self, tag: Tag);

    fn finish(&mut self, tag: Tag);

    fn take_status(&mut self) -> Status;

    fn try_cancel(&mut self);
}

/// Server side of a unary call
pub trait UnaryResponder<W>: Send {
    fn finish(&mut self, msg: W, status: Status, tag: Tag);

    fn finish_with_error(&mut self, status: Status, tag: Tag);

    fn try_cancel(&mut self);
}

/// Server side of a bidirectional call
pub trait ServerReaderWriter<W, R>: Send {
    fn read(&mut self, tag: Tag);

    fn take_read(&mut self) -> Option<R>;

    fn write(&mut self, msg: W, tag: Tag);

    /// Send the terminal status, ending the call
    fn finish(&mut self, status: Status, tag: Tag);

    fn try_cancel(&mut self);
}

/// Unary call delivered to a server acceptor
pub struct IncomingUnary<R, W> {
    pub request: R,
    pub responder: Box<dyn UnaryResponder<W>>,
}

/// Bidirectional call delivered to a server acceptor
pub struct IncomingStream<W, R> {
    pub stream: Box<dyn ServerReaderWriter<W, R>>,
}
