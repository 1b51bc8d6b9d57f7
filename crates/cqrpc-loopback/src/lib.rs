//! # cqrpc-loopback
//!
//! In-process transport for the cqrpc engine.
//!
//! Clients and servers share one [`LoopbackService`]. Messages move between
//! them as values, without framing or serialization, and every operation
//! completes by posting to the caller's completion queue, as a network
//! transport would.
//!
//! ```text
//!   client call ──connect──> LoopbackService ──fill──> server acceptor
//!        │                    (method backlog)              │
//!        └──────────── up pipe / down pipe / status ────────┘
//! ```

mod link;
mod pipe;
mod service;
mod unary;

pub use service::LoopbackService;
