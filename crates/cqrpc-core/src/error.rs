//! Error types

use thiserror::Error;

/// Synchronous failures of the manager, server, and call handles
#[derive(Debug, Error)]
pub enum Error {
    /// Factory used after `shutdown`
    #[error("manager has been shut down")]
    ShutDown,

    /// Factory used before `start`
    #[error("manager has not been started")]
    NotStarted,

    #[error("manager already started")]
    AlreadyStarted,

    /// Operation on a call that has been closed
    #[error("call is closed")]
    Closed,

    /// `write` after `writes_done`
    #[error("writes already done")]
    WritesDone,

    #[error("handler slab full ({capacity} live calls)")]
    SlabFull { capacity: usize },

    #[error("completion queue shut down")]
    QueueShutdown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for cqrpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client call failure, delivered once through the call's error callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CallError {
    /// The stream could not be established
    #[error("connect failed")]
    Connect,

    /// The read side failed before a terminal status was obtained
    #[error("read failed")]
    Read,

    #[error("write failed")]
    Write,

    /// The terminal status exchange failed
    #[error("finish failed")]
    Finish,
}
