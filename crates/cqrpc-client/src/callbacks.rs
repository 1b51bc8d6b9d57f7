//! Application callbacks for client calls
//!
//! Terminal callbacks (`on_done`, `on_error`) are `FnOnce`: a call delivers
//! exactly one of them. Per-message callbacks are `FnMut`.

use cqrpc_core::{CallError, Status};

pub type OnResponse<R> = Box<dyn FnOnce(R, Status) + Send>;
pub type OnStatus = Box<dyn FnOnce(Status) + Send>;
pub type OnError = Box<dyn FnOnce(CallError) + Send>;
pub type OnRead<R> = Box<dyn FnMut(R) + Send>;
pub type OnConnect = Box<dyn FnOnce() + Send>;
pub type OnWrite = Box<dyn FnMut(u64) + Send>;
pub type OnWritesDone = Box<dyn FnOnce() + Send>;

/// Outbound-side hooks shared by the writer and bidirectional calls
#[derive(Default)]
pub(crate) struct WriteHooks {
    pub(crate) on_write: Option<OnWrite>,
    pub(crate) on_writes_done: Option<OnWritesDone>,
}

/// Callbacks for server-streaming and bidirectional calls
///
/// ```ignore
/// let callbacks = StreamCallbacks::new(
///     |msg: i64| println!("read {msg}"),
///     |status| println!("done {status}"),
///     |err| eprintln!("error {err}"),
/// )
/// .on_connect(|| println!("connected"));
/// ```
pub struct StreamCallbacks<R> {
    pub(crate) on_read: Option<OnRead<R>>,
    pub(crate) on_done: Option<OnStatus>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) write: WriteHooks,
}

impl<R> StreamCallbacks<R> {
    pub fn new<FR, FD, FE>(on_read: FR, on_done: FD, on_error: FE) -> Self
    where
        FR: FnMut(R) + Send + 'static,
        FD: FnOnce(Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        Self {
            on_read: Some(Box::new(on_read)),
            on_done: Some(Box::new(on_done)),
            on_error: Some(Box::new(on_error)),
            on_connect: None,
            write: WriteHooks::default(),
        }
    }

    /// Fires once the stream is established
    pub fn on_connect<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    /// Fires with the id returned by `write` once the transport accepted it
    ///
    /// Only meaningful for bidirectional calls.
    pub fn on_write<F: FnMut(u64) + Send + 'static>(mut self, f: F) -> Self {
        self.write.on_write = Some(Box::new(f));
        self
    }

    /// Fires once the half-close has been acknowledged
    pub fn on_writes_done<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.write.on_writes_done = Some(Box::new(f));
        self
    }
}

impl<R> Default for StreamCallbacks<R> {
    fn default() -> Self {
        Self {
            on_read: None,
            on_done: None,
            on_error: None,
            on_connect: None,
            write: WriteHooks::default(),
        }
    }
}

/// Callbacks for client-streaming calls
pub struct WriterCallbacks<R> {
    pub(crate) on_done: Option<OnResponse<R>>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) write: WriteHooks,
}

impl<R> WriterCallbacks<R> {
    pub fn new<FD, FE>(on_done: FD, on_error: FE) -> Self
    where
        FD: FnOnce(R, Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        Self {
            on_done: Some(Box::new(on_done)),
            on_error: Some(Box::new(on_error)),
            on_connect: None,
            write: WriteHooks::default(),
        }
    }

    pub fn on_connect<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_write<F: FnMut(u64) + Send + 'static>(mut self, f: F) -> Self {
        self.write.on_write = Some(Box::new(f));
        self
    }

    pub fn on_writes_done<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.write.on_writes_done = Some(Box::new(f));
        self
    }
}

impl<R> Default for WriterCallbacks<R> {
    fn default() -> Self {
        Self {
            on_done: None,
            on_error: None,
            on_connect: None,
            write: WriteHooks::default(),
        }
    }
}
