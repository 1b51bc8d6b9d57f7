//! Application handler traits
//!
//! A fresh handler instance serves exactly one call. The server builds it
//! from the registered factory, asks it to register interest in the next
//! call (`on_request`), and then drives it through the call.
//!
//! Handler methods run on the event loop with the call's lock released, so
//! they may use the context freely. A panic is caught and logged.

use std::sync::Arc;

use cqrpc_core::{AcceptSlot, IncomingStream, IncomingUnary};

use crate::context::{StreamContext, UnaryContext};

/// Accept slot a unary handler hands to its transport
pub type UnaryAccept<H> = Arc<
    AcceptSlot<IncomingUnary<<H as UnaryHandler>::Request, <H as UnaryHandler>::Response>>,
>;

/// Accept slot a streaming handler hands to its transport
pub type StreamAccept<H> = Arc<
    AcceptSlot<IncomingStream<<H as StreamHandler>::Response, <H as StreamHandler>::Request>>,
>;

/// One request, one response
///
/// ```ignore
/// struct Times100 { service: Arc<LoopbackService> }
///
/// impl UnaryHandler for Times100 {
///     type Request = i64;
///     type Response = i64;
///
///     fn on_request(&mut self, accept: UnaryAccept<Self>) {
///         self.service.request_unary("Times100", accept);
///     }
///
///     fn on_accept(&mut self, ctx: &UnaryContext<i64>, req: i64) {
///         ctx.finish(req * 100, Status::ok());
///     }
/// }
/// ```
pub trait UnaryHandler: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Register `accept` with the transport
    fn on_request(&mut self, accept: UnaryAccept<Self>);

    /// A call arrived; answer now or later through `ctx`
    fn on_accept(&mut self, ctx: &UnaryContext<Self::Response>, request: Self::Request);
}

/// Streaming call: any mix of inbound and outbound messages
///
/// Serves server-streaming, client-streaming and bidirectional methods
/// alike; the transport decides how many messages each direction carries.
pub trait StreamHandler: Send + 'static {
    /// Inbound message type
    type Request: Send + 'static;
    /// Outbound message type
    type Response: Send + 'static;

    fn on_request(&mut self, accept: StreamAccept<Self>);

    /// A call arrived; reading starts once this returns
    fn on_accept(&mut self, _ctx: &StreamContext<Self::Response>) {}

    fn on_read(&mut self, ctx: &StreamContext<Self::Response>, msg: Self::Request);

    /// The client half-closed, or the inbound direction broke
    fn on_read_done_or_error(&mut self, _ctx: &StreamContext<Self::Response>) {}
}
