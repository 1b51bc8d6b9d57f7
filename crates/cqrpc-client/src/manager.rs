//! Client manager
//!
//! Entry point for application-owned calls. Every factory returns a
//! [`Handle`]; dropping the last clone of a handle cancels the call.
//!
//! # Example
//!
//! ```ignore
//! let manager = ClientManager::new(2)?;
//! manager.start()?;
//!
//! let call = manager.create_unary_call(
//!     |ctx, req| transport.unary("Echo", ctx, req),
//!     request,
//!     |resp, status| println!("{status}: {resp:?}"),
//!     |err| eprintln!("{err}"),
//! )?;
//! ```

use std::time::Duration;

use cqrpc_core::{
    CallError, ClientReader, ClientReaderWriter, ClientWriter, ConnectContext, Result, Status,
    UnaryCall,
};
use cqrpc_runtime::{Alarm, Engine, Handle, ManagerConfig};

use crate::bidi::BidiStream;
use crate::callbacks::{StreamCallbacks, WriterCallbacks};
use crate::reader::ServerStreamReader;
use crate::unary::UnaryClientCall;
use crate::writer::ClientStreamWriter;

pub struct ClientManager {
    engine: Engine,
}

impl ClientManager {
    /// Manager with `threads` event loops and default settings otherwise
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(ManagerConfig::new().threads(threads).thread_name("cqrpc-client"))
    }

    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::new("client", config)?,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.engine.start()
    }

    /// Cancel every live call and join the event loops; idempotent
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }

    /// Issue a unary call
    ///
    /// `connect` receives the request and starts the call on the transport.
    /// Exactly one of `on_done` and `on_error` runs unless the call is
    /// closed first.
    pub fn create_unary_call<Q, R, C, FD, FE>(
        &self,
        connect: C,
        request: Q,
        on_done: FD,
        on_error: FE,
    ) -> Result<Handle<UnaryClientCall<R>>>
    where
        R: Default + Send + 'static,
        C: FnOnce(ConnectContext, Q) -> Box<dyn UnaryCall<R>>,
        FD: FnOnce(R, Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        let call = self.engine.create_call(|slot| {
            UnaryClientCall::new(slot, Box::new(on_done), Box::new(on_error))
        })?;
        call.start(connect, request);
        Ok(call)
    }

    pub fn create_server_stream_reader<Q, R, C, FR, FD, FE>(
        &self,
        connect: C,
        request: Q,
        on_read: FR,
        on_done: FD,
        on_error: FE,
    ) -> Result<Handle<ServerStreamReader<R>>>
    where
        R: Send + 'static,
        C: FnOnce(ConnectContext, Q) -> Box<dyn ClientReader<R>>,
        FR: FnMut(R) + Send + 'static,
        FD: FnOnce(Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        self.create_server_stream_reader_with(
            connect,
            request,
            StreamCallbacks::new(on_read, on_done, on_error),
        )
    }

    /// Server-streaming call with the full callback set
    pub fn create_server_stream_reader_with<Q, R, C>(
        &self,
        connect: C,
        request: Q,
        callbacks: StreamCallbacks<R>,
    ) -> Result<Handle<ServerStreamReader<R>>>
    where
        R: Send + 'static,
        C: FnOnce(ConnectContext, Q) -> Box<dyn ClientReader<R>>,
    {
        let call = self
            .engine
            .create_call(|slot| ServerStreamReader::new(slot, callbacks))?;
        call.start(connect, request);
        Ok(call)
    }

    pub fn create_client_stream_writer<W, R, C, FD, FE>(
        &self,
        connect: C,
        on_done: FD,
        on_error: FE,
    ) -> Result<Handle<ClientStreamWriter<W, R>>>
    where
        W: Send + 'static,
        R: Default + Send + 'static,
        C: FnOnce(ConnectContext) -> Box<dyn ClientWriter<W, R>>,
        FD: FnOnce(R, Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        self.create_client_stream_writer_with(connect, WriterCallbacks::new(on_done, on_error))
    }

    pub fn create_client_stream_writer_with<W, R, C>(
        &self,
        connect: C,
        callbacks: WriterCallbacks<R>,
    ) -> Result<Handle<ClientStreamWriter<W, R>>>
    where
        W: Send + 'static,
        R: Default + Send + 'static,
        C: FnOnce(ConnectContext) -> Box<dyn ClientWriter<W, R>>,
    {
        let call = self
            .engine
            .create_call(|slot| ClientStreamWriter::new(slot, callbacks))?;
        call.start(connect);
        Ok(call)
    }

    pub fn create_bidi_stream<W, R, C, FR, FD, FE>(
        &self,
        connect: C,
        on_read: FR,
        on_done: FD,
        on_error: FE,
    ) -> Result<Handle<BidiStream<W, R>>>
    where
        W: Send + 'static,
        R: Send + 'static,
        C: FnOnce(ConnectContext) -> Box<dyn ClientReaderWriter<W, R>>,
        FR: FnMut(R) + Send + 'static,
        FD: FnOnce(Status) + Send + 'static,
        FE: FnOnce(CallError) + Send + 'static,
    {
        self.create_bidi_stream_with(connect, StreamCallbacks::new(on_read, on_done, on_error))
    }

    pub fn create_bidi_stream_with<W, R, C>(
        &self,
        connect: C,
        callbacks: StreamCallbacks<R>,
    ) -> Result<Handle<BidiStream<W, R>>>
    where
        W: Send + 'static,
        R: Send + 'static,
        C: FnOnce(ConnectContext) -> Box<dyn ClientReaderWriter<W, R>>,
    {
        let call = self
            .engine
            .create_call(|slot| BidiStream::new(slot, callbacks))?;
        call.start(connect);
        Ok(call)
    }

    /// Alarm armed to run `callback` after `after`
    pub fn create_alarm<F>(&self, after: Duration, callback: F) -> Result<Handle<Alarm>>
    where
        F: FnOnce() + Send + 'static,
    {
        let alarm = self.engine.create_alarm()?;
        alarm.set(after, callback);
        Ok(alarm)
    }

    /// Registry entries, expired ones included until the next factory call
    pub fn registry_len(&self) -> usize {
        self.engine.registry_len()
    }

    /// Calls whose slot has not been released yet
    pub fn live_calls(&self) -> usize {
        self.engine.live_calls()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn config(&self) -> &ManagerConfig {
        self.engine.config()
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::Mock;
    use cqrpc_core::{Error, Op};
    use std::sync::mpsc;

    #[test]
    fn test_factory_before_start() {
        let manager = ClientManager::new(1).unwrap();
        let mock = Mock::new();
        let m = mock.clone();
        let res = manager.create_unary_call(
            move |ctx, _req: i64| m.connect_unary(ctx),
            1,
            |_: i64, _| {},
            |_| {},
        );
        assert!(matches!(res, Err(Error::NotStarted)));
        assert!(mock.log().is_empty());
    }

    #[test]
    fn test_factory_after_shutdown() {
        let manager = ClientManager::new(1).unwrap();
        manager.start().unwrap();
        manager.shutdown();

        let mock = Mock::new();
        let m = mock.clone();
        let res = manager.create_bidi_stream(
            move |ctx| m.connect_bidi(ctx),
            |_: i64| {},
            |_| {},
            |_| {},
        );
        assert!(matches!(res, Err(Error::ShutDown)));
        assert!(matches!(
            manager.create_alarm(Duration::from_millis(1), || {}),
            Err(Error::ShutDown)
        ));
        assert!(mock.log().is_empty());
    }

    #[test]
    fn test_double_start() {
        let manager = ClientManager::new(1).unwrap();
        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(Error::AlreadyStarted)));
        assert!(manager.is_running());
    }

    #[test]
    fn test_shutdown_cancels_live_calls() {
        let manager = ClientManager::new(2).unwrap();
        manager.start().unwrap();
        let mock = Mock::new();
        let (tx, rx) = mpsc::channel::<()>();
        let (t1, t2) = (tx.clone(), tx.clone());

        let m = mock.clone();
        let reader = manager
            .create_server_stream_reader(
                move |ctx, _req: i64| m.connect_reader(ctx),
                1,
                |_: i64| {},
                move |_| {
                    let _ = t1.send(());
                },
                move |_| {
                    let _ = t2.send(());
                },
            )
            .unwrap();
        mock.complete(Op::Connect, true);
        mock.wait_for(Op::Read);

        manager.shutdown();
        manager.shutdown();
        assert!(reader.is_closed());
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Empty));
        assert_eq!(manager.live_calls(), 0);
    }

    #[test]
    fn test_alarm_fires() {
        let manager = ClientManager::new(1).unwrap();
        manager.start().unwrap();
        let (tx, rx) = mpsc::channel();

        let _alarm = manager
            .create_alarm(Duration::from_millis(10), move || {
                let _ = tx.send(());
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            ClientManager::new(0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ClientManager::new(1000),
            Err(Error::InvalidConfig(_))
        ));
    }
}
