//! Application callback runner
//!
//! Callbacks always run with the call's lock released. A panic inside one
//! is caught and logged; it never unwinds into the event loop.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run an application callback, catching and logging a panic
pub fn run_callback<F: FnOnce()>(name: &'static str, f: F) {
    tracing::trace!(callback = name, "call");
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            callback = name,
            what = panic_message(payload.as_ref()),
            "callback panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
