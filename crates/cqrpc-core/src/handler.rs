//! Dispatch capability

use crate::tag::Op;

/// Anything a completion tag can be dispatched to
///
/// `proceed` is called exactly once per delivered event, on the worker
/// thread that owns the queue the event arrived on. Implementations route
/// on `op`; `ok` is the transport's success flag for that operation.
pub trait Handler: Send + Sync {
    fn proceed(&self, op: Op, ok: bool);
}
