//! # cqrpc-runtime
//!
//! Threads, ownership and timers for the cqrpc call-lifecycle engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Engine                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │   Registry   │   │ HandlerSlab  │   │ TimerService  │  │
//! │  │ (weak, lazy) │   │ (tag → call) │   │ (heap thread) │  │
//! │  └──────────────┘   └──────┬───────┘   └───────┬───────┘  │
//! │                            │ resolve           │ post     │
//! │  ┌─────────────────────────┴───────────────────┴───────┐  │
//! │  │ EventLoopPool: loop-0 ◄ cq-0   ...   loop-N ◄ cq-N  │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! A call is created through [`Engine::create_call`], which binds it to a
//! queue round-robin and returns the application [`Handle`]. The event
//! loops reach the call through its slab slot only; the registry holds
//! a weak reference for bulk shutdown.

pub mod alarm;
pub mod callback;
pub mod config;
pub mod engine;
pub mod handle;
pub mod pool;
pub mod registry;
pub mod timer;

pub use alarm::{Alarm, AlarmCallback};
pub use callback::run_callback;
pub use config::{ManagerConfig, DEFAULT_MAX_CALLS, MAX_THREADS};
pub use engine::Engine;
pub use handle::{CallHandle, CallSlot, Handle};
pub use pool::{current_loop_id, EventLoopPool, LoopStats};
pub use registry::{Closeable, Registry};
pub use timer::{TimerService, TimerStats, TimerThreadConfig};
