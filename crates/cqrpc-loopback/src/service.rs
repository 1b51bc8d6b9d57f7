//! Loopback service: method registry and call rendezvous
//!
//! Methods are registered by name with their message types. A server
//! registers accept slots for a method; a client connecting to it is handed
//! to the oldest waiting slot, or parked in the method's backlog until one
//! arrives.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use cqrpc_core::{
    AcceptSlot, ClientReader, ClientReaderWriter, ClientWriter, CompletionQueue, ConnectContext,
    IncomingStream, IncomingUnary, UnaryCall,
};

use crate::link::{Link, LoopbackStream, ServerEnd};
use crate::unary::{LoopbackResponder, LoopbackUnary, UnaryLink};

type Bind = Box<dyn Fn(Arc<CompletionQueue>) + Send>;

/// A call waiting for an acceptor
struct Offer<T> {
    incoming: T,
    /// Points the server end at the accepting responder's queue
    bind: Bind,
}

struct Method<T> {
    acceptors: VecDeque<Arc<AcceptSlot<T>>>,
    backlog: VecDeque<Offer<T>>,
}

impl<T: Send + 'static> Method<T> {
    fn new() -> Self {
        Self {
            acceptors: VecDeque::new(),
            backlog: VecDeque::new(),
        }
    }

    /// Hand `offer` to the oldest live acceptor; back it goes on failure
    fn deliver(&mut self, mut offer: Offer<T>) -> Result<(), Offer<T>> {
        while let Some(acceptor) = self.acceptors.pop_front() {
            (offer.bind)(Arc::clone(acceptor.queue()));
            match acceptor.fill(offer.incoming) {
                Ok(()) => return Ok(()),
                // Cancelled meanwhile: try the next one
                Err(incoming) => offer.incoming = incoming,
            }
        }
        Err(offer)
    }

    fn request(&mut self, accept: Arc<AcceptSlot<T>>) {
        self.acceptors.retain(|a| !a.is_completed());
        self.acceptors.push_back(accept);
        while let Some(offer) = self.backlog.pop_front() {
            if let Err(offer) = self.deliver(offer) {
                self.backlog.push_front(offer);
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unary,
    Stream,
}

struct Entry {
    kind: Kind,
    method: Box<dyn Any + Send>,
    backlog_len: fn(&(dyn Any + Send)) -> usize,
    clear: fn(&mut (dyn Any + Send)),
}

struct ServiceInner {
    methods: HashMap<String, Entry>,
    shut_down: bool,
}

/// In-process transport endpoint shared by clients and servers
#[derive(Clone)]
pub struct LoopbackService {
    inner: Arc<Mutex<ServiceInner>>,
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new()
    }
}

type StreamIncoming<Q, P> = IncomingStream<P, Q>;

fn backlog_len_of<T: Send + 'static>(method: &(dyn Any + Send)) -> usize {
    method
        .downcast_ref::<Method<T>>()
        .map_or(0, |m| m.backlog.len())
}

fn clear_of<T: Send + 'static>(method: &mut (dyn Any + Send)) {
    if let Some(m) = method.downcast_mut::<Method<T>>() {
        m.backlog.clear();
        for acceptor in m.acceptors.drain(..) {
            acceptor.cancel();
        }
    }
}

impl LoopbackService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceInner {
                methods: HashMap::new(),
                shut_down: false,
            })),
        }
    }

    fn add<T: Send + 'static>(&self, name: &str, kind: Kind) {
        let mut inner = self.inner.lock();
        let entry = Entry {
            kind,
            method: Box::new(Method::<T>::new()),
            backlog_len: backlog_len_of::<T>,
            clear: clear_of::<T>,
        };
        if inner.methods.insert(name.to_string(), entry).is_some() {
            tracing::warn!(method = name, "method registered twice, replaced");
        }
    }

    /// Register a unary method taking `Q` and answering `P`
    pub fn add_unary<Q: Send + 'static, P: Send + 'static>(&self, name: &str) {
        self.add::<IncomingUnary<Q, P>>(name, Kind::Unary);
    }

    /// Register a streaming method; clients send `Q`, the server sends `P`
    pub fn add_stream<Q: Send + 'static, P: Send + 'static>(&self, name: &str) {
        self.add::<StreamIncoming<Q, P>>(name, Kind::Stream);
    }

    fn request<T: Send + 'static>(&self, name: &str, kind: Kind, accept: Arc<AcceptSlot<T>>) {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            drop(inner);
            accept.cancel();
            return;
        }
        let method = inner
            .methods
            .get_mut(name)
            .filter(|e| e.kind == kind)
            .and_then(|e| e.method.downcast_mut::<Method<T>>());
        if let Some(method) = method {
            method.request(accept);
            return;
        }
        drop(inner);
        tracing::error!(method = name, ?kind, "no such method");
        accept.cancel();
    }

    /// Wait for the next unary call to `name`
    pub fn request_unary<Q: Send + 'static, P: Send + 'static>(
        &self,
        name: &str,
        accept: Arc<AcceptSlot<IncomingUnary<Q, P>>>,
    ) {
        self.request(name, Kind::Unary, accept);
    }

    /// Wait for the next streaming call to `name`
    pub fn request_stream<Q: Send + 'static, P: Send + 'static>(
        &self,
        name: &str,
        accept: Arc<AcceptSlot<IncomingStream<P, Q>>>,
    ) {
        self.request(name, Kind::Stream, accept);
    }

    /// Deliver a new call; false if the method is unknown or the service
    /// is shut down
    fn offer<T: Send + 'static>(&self, name: &str, kind: Kind, offer: Offer<T>) -> bool {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            tracing::debug!(method = name, "connect after shutdown");
            return false;
        }
        let method = inner
            .methods
            .get_mut(name)
            .filter(|e| e.kind == kind)
            .and_then(|e| e.method.downcast_mut::<Method<T>>());
        let Some(method) = method else {
            tracing::warn!(method = name, ?kind, "connect to unknown method");
            return false;
        };
        if let Err(offer) = method.deliver(offer) {
            method.backlog.push_back(offer);
            tracing::trace!(method = name, backlog = method.backlog.len(), "call backlogged");
        }
        true
    }

    fn connect_stream<Q, P>(&self, name: &str, ctx: &ConnectContext) -> Arc<Link<Q, P>>
    where
        Q: Send + 'static,
        P: Send + 'static,
    {
        let link = Link::new();
        let bound = Arc::clone(&link);
        let offer = Offer {
            incoming: IncomingStream {
                stream: Box::new(ServerEnd::new(Arc::clone(&link))),
            },
            bind: Box::new(move |queue| bound.bind_server(queue)),
        };
        let ok = self.offer::<StreamIncoming<Q, P>>(name, Kind::Stream, offer);
        ctx.queue.post(ctx.tag, ok);
        link
    }

    /// Start a unary call; the connect tag is not used
    pub fn unary<Q, P>(&self, name: &str, ctx: ConnectContext, request: Q) -> Box<dyn UnaryCall<P>>
    where
        Q: Send + 'static,
        P: Send + 'static,
    {
        let link = UnaryLink::new();
        let bound = Arc::clone(&link);
        let offer = Offer {
            incoming: IncomingUnary {
                request,
                responder: Box::new(LoopbackResponder::new(Arc::clone(&link))),
            },
            bind: Box::new(move |queue| bound.bind_server(queue)),
        };
        if self.offer::<IncomingUnary<Q, P>>(name, Kind::Unary, offer) {
            Box::new(LoopbackUnary::new(ctx.queue, link))
        } else {
            Box::new(LoopbackUnary::broken(ctx.queue))
        }
    }

    /// Start a server-streaming call: `request` is sent, then the client
    /// half-closes
    pub fn server_stream<Q, P>(
        &self,
        name: &str,
        ctx: ConnectContext,
        request: Q,
    ) -> Box<dyn ClientReader<P>>
    where
        Q: Send + 'static,
        P: Send + 'static,
    {
        let link = self.connect_stream::<Q, P>(name, &ctx);
        let mut stream = LoopbackStream::new(&ctx, link);
        stream.send_and_close(request);
        Box::new(stream)
    }

    /// Start a client-streaming call
    pub fn client_stream<Q, P>(&self, name: &str, ctx: ConnectContext) -> Box<dyn ClientWriter<Q, P>>
    where
        Q: Send + 'static,
        P: Send + 'static,
    {
        let link = self.connect_stream::<Q, P>(name, &ctx);
        Box::new(LoopbackStream::new(&ctx, link))
    }

    /// Start a bidirectional call
    pub fn bidi<Q, P>(&self, name: &str, ctx: ConnectContext) -> Box<dyn ClientReaderWriter<Q, P>>
    where
        Q: Send + 'static,
        P: Send + 'static,
    {
        let link = self.connect_stream::<Q, P>(name, &ctx);
        Box::new(LoopbackStream::new(&ctx, link))
    }

    /// Calls to `name` waiting for an acceptor
    pub fn backlog_len(&self, name: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .methods
            .get(name)
            .map_or(0, |e| (e.backlog_len)(e.method.as_ref()))
    }

    /// Fail every backlogged call, cancel waiting acceptors and refuse
    /// later connects
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        for entry in inner.methods.values_mut() {
            (entry.clear)(entry.method.as_mut());
        }
        tracing::debug!("loopback service shut down");
    }
}
