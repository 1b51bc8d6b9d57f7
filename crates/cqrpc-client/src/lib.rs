//! # cqrpc-client
//!
//! Client call state machines driven by the cqrpc event loops.
//!
//! | Call | Request | Response | Terminal callback |
//! |------|---------|----------|-------------------|
//! | [`UnaryClientCall`] | one | one | `on_done(resp, status)` |
//! | [`ServerStreamReader`] | one | stream | `on_done(status)` |
//! | [`ClientStreamWriter`] | stream | one | `on_done(resp, status)` |
//! | [`BidiStream`] | stream | stream | `on_done(status)` |
//!
//! Every call reports exactly one of `on_done` and `on_error`, unless the
//! application closes it first, in which case it reports nothing.

mod bidi;
mod callbacks;
mod inbound;
mod manager;
mod outbound;
mod reader;
mod unary;
mod writer;

#[cfg(test)]
mod mock;

pub use bidi::BidiStream;
pub use callbacks::{
    OnConnect, OnError, OnRead, OnResponse, OnStatus, OnWrite, OnWritesDone, StreamCallbacks,
    WriterCallbacks,
};
pub use manager::ClientManager;
pub use reader::ServerStreamReader;
pub use unary::UnaryClientCall;
pub use writer::ClientStreamWriter;

pub use cqrpc_runtime::{Alarm, Handle};

pub type UnaryHandle<R> = Handle<UnaryClientCall<R>>;
pub type ReaderHandle<R> = Handle<ServerStreamReader<R>>;
pub type WriterHandle<W, R> = Handle<ClientStreamWriter<W, R>>;
pub type BidiHandle<W, R> = Handle<BidiStream<W, R>>;
