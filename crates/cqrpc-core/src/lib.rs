//! # cqrpc-core
//!
//! Core types and traits for the cqrpc call-lifecycle engine.
//!
//! This crate knows nothing about threads or transports. It defines the
//! vocabulary the runtime, client, and server crates share.
//!
//! ## Modules
//!
//! - `tag` - Completion tags (slot key + operation kind)
//! - `slab` - Generation-checked arena of live handlers
//! - `queue` - Completion queue with shutdown-then-drain semantics
//! - `handler` - The `Handler` dispatch capability
//! - `status` - Terminal call status
//! - `transport` - Traits a transport implements
//! - `accept` - Server accept rendezvous
//! - `error` - Error types
//! - `env` - Environment variable helpers

pub mod accept;
pub mod env;
pub mod error;
pub mod handler;
pub mod queue;
pub mod slab;
pub mod status;
pub mod tag;
pub mod transport;

// Re-exports for convenience
pub use accept::AcceptSlot;
pub use error::{CallError, Error, Result};
pub use handler::Handler;
pub use queue::{CompletionQueue, Event};
pub use slab::HandlerSlab;
pub use status::{Code, Status};
pub use tag::{Op, SlotKey, Tag};
pub use transport::{
    ClientReader, ClientReaderWriter, ClientWriter, ConnectContext, IncomingStream, IncomingUnary,
    ServerReaderWriter, UnaryCall, UnaryResponder,
};
