//! Responder factories
//!
//! One spawner per registered handler. Every event loop starts with one
//! waiting responder per spawner, and each accepted call spawns its
//! successor on the same queue before it is processed.

use std::sync::{Arc, Weak};

use cqrpc_core::{CompletionQueue, Error, Result};
use cqrpc_runtime::Engine;

pub(crate) trait Spawn: Send + Sync {
    /// Spawn a fresh waiting responder bound to `queue`
    fn spawn(self: Arc<Self>, queue: &Arc<CompletionQueue>) -> Result<()>;
}

pub(crate) struct Acceptor<H> {
    engine: Weak<Engine>,
    factory: Box<dyn Fn() -> H + Send + Sync>,
}

impl<H> Acceptor<H> {
    pub(crate) fn new<F>(engine: Weak<Engine>, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            engine,
            factory: Box::new(factory),
        }
    }

    pub(crate) fn engine(&self) -> Result<Arc<Engine>> {
        self.engine.upgrade().ok_or(Error::ShutDown)
    }

    pub(crate) fn make_handler(&self) -> H {
        (self.factory)()
    }
}

/// Spawn a successor, logging instead of failing
///
/// Fails quietly once the server is shutting down.
pub(crate) fn respawn(spawner: Arc<dyn Spawn>, queue: &Arc<CompletionQueue>) {
    match spawner.spawn(queue) {
        Ok(()) => {}
        Err(Error::ShutDown) => {}
        Err(e) => tracing::error!(queue = queue.id(), error = %e, "failed to spawn responder"),
    }
}
