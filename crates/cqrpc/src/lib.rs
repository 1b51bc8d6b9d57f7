//! # cqrpc - completion-queue RPC call lifecycle
//!
//! Drives asynchronous RPC calls through a pool of event loops, each
//! pulling completions from its own queue and dispatching them to the
//! call's state machine.
//!
//! ## Features
//!
//! - **Client calls**: unary, server-streaming, client-streaming and
//!   bidirectional, reporting through callbacks
//! - **Server responders**: one handler instance per call, re-armed on every
//!   accept
//! - **Alarms**: re-armable timers delivered through the same queues
//! - **Safe dispatch**: tags are generation-checked slab keys, so a late
//!   completion never reaches a released call
//! - **Handle ownership**: dropping the last handle cancels the call
//!
//! ## Quick Start
//!
//! ```ignore
//! use cqrpc::{ClientManager, LoopbackService, Server, Status};
//!
//! let service = LoopbackService::new();
//! service.add_unary::<i64, i64>("Times100");
//!
//! let server = Server::new(2)?;
//! let svc = service.clone();
//! server.register_unary_handler(move || Times100 { service: svc.clone() })?;
//! server.start()?;
//!
//! let client = ClientManager::new(2)?;
//! client.start()?;
//! let _call = client.create_unary_call(
//!     |ctx, req| service.unary("Times100", ctx, req),
//!     7i64,
//!     |resp: i64, status| println!("{status}: {resp}"),
//!     |err| eprintln!("{err}"),
//! )?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │      ClientManager       │        │          Server          │
//! │ unary/reader/writer/bidi │        │ unary/stream responders  │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Engine (per manager)                   │
//! │     slab + registry + event loops + timer thread            │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transport (traits in cqrpc-core)            │
//! │                 e.g. the in-process loopback                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use cqrpc_core::{
    AcceptSlot, CallError, ClientReader, ClientReaderWriter, ClientWriter, Code,
    CompletionQueue, ConnectContext, Error, IncomingStream, IncomingUnary, Result,
    ServerReaderWriter, Status, UnaryCall, UnaryResponder,
};

// Re-export env utilities
pub use cqrpc_core::env::{env_get, env_get_bool, env_get_ms, env_get_opt};

// Re-export runtime types
pub use cqrpc_runtime::{Alarm, Handle, ManagerConfig, TimerThreadConfig};

pub use cqrpc_client::{
    BidiHandle, BidiStream, ClientManager, ClientStreamWriter, ReaderHandle, ServerStreamReader,
    StreamCallbacks, UnaryClientCall, UnaryHandle, WriterCallbacks, WriterHandle,
};

pub use cqrpc_server::{
    Server, StreamAccept, StreamContext, StreamHandler, UnaryAccept, UnaryContext, UnaryHandler,
};

pub use cqrpc_loopback::LoopbackService;

#[cfg(test)]
mod e2e;
