//! # cqrpc-server
//!
//! Server-side responders for the cqrpc engine.
//!
//! ```text
//!   register_*_handler(factory)
//!            |
//!          start ──> one waiting responder per handler per event loop
//!                          |
//!                  accept ─┴─> spawn successor, then run the handler
//! ```
//!
//! Handlers answer through a context ([`UnaryContext`], [`StreamContext`]).
//! Context requests are forwarded to the call's event loop, so they can be
//! made from any thread.

mod acceptor;
mod context;
mod handler;
mod server;
mod stream;
mod unary;

#[cfg(test)]
mod mock;

pub use context::{StreamContext, UnaryContext};
pub use handler::{StreamAccept, StreamHandler, UnaryAccept, UnaryHandler};
pub use server::Server;
pub use stream::StreamServerCall;
pub use unary::UnaryServerCall;
