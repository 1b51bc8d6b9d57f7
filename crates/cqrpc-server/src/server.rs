//! Server
//!
//! Handlers are registered before `start`. Starting spawns one waiting
//! responder per registered handler on every event loop; from then on each
//! accepted call spawns its own successor.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cqrpc_core::{Error, Result};
use cqrpc_runtime::{Alarm, Engine, Handle, ManagerConfig};

use crate::acceptor::{Acceptor, Spawn};
use crate::handler::{StreamHandler, UnaryHandler};
use crate::stream::StreamSpawner;
use crate::unary::UnarySpawner;

pub struct Server {
    engine: Arc<Engine>,
    spawners: Mutex<Vec<Arc<dyn Spawn>>>,
}

impl Server {
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(ManagerConfig::new().threads(threads).thread_name("cqrpc-server"))
    }

    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(Engine::new("server", config)?),
            spawners: Mutex::new(Vec::new()),
        })
    }

    /// Serve unary calls with handlers built by `factory`, one per call
    pub fn register_unary_handler<H, F>(&self, factory: F) -> Result<()>
    where
        H: UnaryHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let acceptor = Acceptor::new(Arc::downgrade(&self.engine), factory);
        self.register(UnarySpawner::new(acceptor))
    }

    /// Serve streaming calls with handlers built by `factory`, one per call
    pub fn register_stream_handler<H, F>(&self, factory: F) -> Result<()>
    where
        H: StreamHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let acceptor = Acceptor::new(Arc::downgrade(&self.engine), factory);
        self.register(StreamSpawner::new(acceptor))
    }

    fn register(&self, spawner: Arc<dyn Spawn>) -> Result<()> {
        let mut spawners = self.spawners.lock();
        if self.engine.is_shutting_down() {
            return Err(Error::ShutDown);
        }
        if self.engine.is_running() {
            return Err(Error::AlreadyStarted);
        }
        spawners.push(spawner);
        Ok(())
    }

    /// Spawn the event loops and the first responders
    pub fn start(&self) -> Result<()> {
        let spawners = self.spawners.lock();
        self.engine.start()?;

        let queues = self.engine.queues()?;
        for queue in &queues {
            for spawner in spawners.iter() {
                Arc::clone(spawner).spawn(queue)?;
            }
        }
        tracing::info!(
            handlers = spawners.len(),
            responders = queues.len() * spawners.len(),
            "server accepting"
        );
        Ok(())
    }

    /// Stop accepting, cancel every call and join the event loops
    ///
    /// Idempotent. Writes and finishes requested through a context after
    /// this point are ignored.
    pub fn shutdown(&self) {
        self.engine.shutdown();
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

    /// Registry entries, expired ones included until the next spawn
    pub fn registry_len(&self) -> usize {
        self.engine.registry_len()
    }

    /// Responders and alarms whose slot has not been released yet
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

impl Drop for Server {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fake, Out, Silent, StreamEcho, Times100};
    use cqrpc_core::Code;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_until(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !f() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_unary_times_100() {
        let fake = Fake::new();
        let server = Server::new(1).unwrap();
        let f = fake.clone();
        server
            .register_unary_handler(move || Times100 { fake: f.clone() })
            .unwrap();
        server.start().unwrap();

        for i in 1..=3 {
            let rx = fake.call_unary(i);
            assert_eq!(rx.recv_timeout(WAIT).unwrap(), (i * 100, Code::Ok));
        }

        // A fresh acceptor is always waiting
        wait_until(|| fake.waiting_unary() == 1);
    }

    #[test]
    fn test_stream_reply_order() {
        let fake = Fake::new();
        let server = Server::new(2).unwrap();
        let f = fake.clone();
        server
            .register_stream_handler(move || StreamEcho { fake: f.clone() })
            .unwrap();
        server.start().unwrap();

        let rx = fake.call_stream(vec![1, 2]);
        let got: Vec<Out> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            got,
            vec![
                Out::Message(0),
                Out::Message(10),
                Out::Message(20),
                Out::Message(-1),
                Out::Status(Code::Ok),
            ]
        );
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_register_after_start() {
        let fake = Fake::new();
        let server = Server::new(1).unwrap();
        server.start().unwrap();
        let f = fake.clone();
        let res = server.register_unary_handler(move || Times100 { fake: f.clone() });
        assert!(matches!(res, Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_shutdown_cancels_acceptors() {
        let fake = Fake::new();
        let server = Server::new(2).unwrap();
        let (f1, f2) = (fake.clone(), fake.clone());
        server
            .register_unary_handler(move || Times100 { fake: f1.clone() })
            .unwrap();
        server
            .register_stream_handler(move || StreamEcho { fake: f2.clone() })
            .unwrap();
        server.start().unwrap();
        wait_until(|| fake.waiting_unary() == 2 && fake.waiting_stream() == 2);

        server.shutdown();
        server.shutdown();
        assert_eq!(fake.waiting_unary(), 0);
        assert_eq!(fake.waiting_stream(), 0);
        assert_eq!(server.live_calls(), 0);
        assert!(matches!(
            server.create_alarm(Duration::from_millis(1), || {}),
            Err(Error::ShutDown)
        ));
    }

    #[test]
    fn test_shutdown_cancels_idle_stream() {
        let fake = Fake::new();
        let server = Server::new(1).unwrap();
        let f = fake.clone();
        server
            .register_stream_handler(move || Silent { fake: f.clone() })
            .unwrap();
        server.start().unwrap();

        // Inbound side done, nothing written, no status yet
        let _rx = fake.call_stream(vec![]);
        wait_until(|| fake.ended() == 1);
        assert_eq!(fake.cancels(), 0);

        server.shutdown();
        assert_eq!(fake.cancels(), 1);
        assert_eq!(server.live_calls(), 0);
    }

    #[test]
    fn test_finished_stream_not_cancelled() {
        let fake = Fake::new();
        let server = Server::new(1).unwrap();
        let f = fake.clone();
        server
            .register_stream_handler(move || StreamEcho { fake: f.clone() })
            .unwrap();
        server.start().unwrap();

        let rx = fake.call_stream(vec![]);
        let got: Vec<Out> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(got.last(), Some(&Out::Status(Code::Ok)));
        wait_until(|| fake.waiting_stream() == 1 && server.live_calls() == 1);

        server.shutdown();
        assert_eq!(fake.cancels(), 0);
    }

    #[test]
    fn test_context_outlived_call() {
        let fake = Fake::new();
        let server = Server::new(1).unwrap();
        let f = fake.clone();
        server
            .register_unary_handler(move || Times100 { fake: f.clone() })
            .unwrap();
        server.start().unwrap();

        let rx = fake.call_unary(5);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (500, Code::Ok));

        // The finished call is released; a kept context goes inert
        let ctx = fake.last_unary_context().unwrap();
        wait_until(|| !ctx.is_live());
        ctx.finish(1, cqrpc_core::Status::ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
