//! Call engine shared by the client manager and the server
//!
//! Owns the event-loop pool, the handler slab, the timer thread and the
//! weak registry. One manager-wide lock guards the registry, the round-robin
//! counter and the lifecycle state; it is held only for bookkeeping and
//! never while a handler runs.
//!
//! # Shutdown order
//!
//! 1. mark shut down (factories fail from here on)
//! 2. close every registered call
//! 3. stop the timer thread
//! 4. shut down every completion queue
//! 5. join every event loop
//! 6. drop whatever is still in the slab

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cqrpc_core::{CompletionQueue, Error, Handler, HandlerSlab, Result};

use crate::alarm::Alarm;
use crate::config::ManagerConfig;
use crate::handle::{CallHandle, CallSlot, Handle};
use crate::pool::EventLoopPool;
use crate::registry::{Closeable, Registry};
use crate::timer::TimerService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    ShutDown,
}

struct EngineInner {
    state: EngineState,
    pool: Option<EventLoopPool>,
    timers: Option<Arc<TimerService>>,
    registry: Registry,
    /// Round-robin counter for queue assignment
    next_id: u64,
}

pub struct Engine {
    name: &'static str,
    config: ManagerConfig,
    slab: Arc<HandlerSlab>,
    inner: Mutex<EngineInner>,
    shutdown_flag: Arc<AtomicBool>,
}

impl Engine {
    /// Build an idle engine; `name` only labels log lines
    pub fn new(name: &'static str, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name,
            slab: Arc::new(HandlerSlab::new(config.max_calls)),
            config,
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                pool: None,
                timers: None,
                registry: Registry::new(),
                next_id: 0,
            }),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Spawn the event loops and the timer thread
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::Idle => {}
            EngineState::Running => return Err(Error::AlreadyStarted),
            EngineState::ShutDown => return Err(Error::ShutDown),
        }

        let timers = Arc::new(TimerService::spawn(self.config.timer.clone())?);
        let pool = match EventLoopPool::spawn(
            self.config.threads,
            &self.config.thread_name,
            Arc::clone(&self.slab),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                timers.shutdown();
                return Err(e);
            }
        };

        inner.pool = Some(pool);
        inner.timers = Some(timers);
        inner.state = EngineState::Running;

        tracing::info!(engine = self.name, threads = self.config.threads, "started");
        Ok(())
    }

    /// Create an application-owned call
    ///
    /// `make` builds the call bound to a round-robin queue; it runs under
    /// the manager lock and must not issue any operation. The caller starts
    /// the call once the handle is returned.
    pub fn create_call<C, F>(&self, make: F) -> Result<Handle<C>>
    where
        C: Handler + Closeable + 'static,
        F: FnOnce(CallSlot) -> Arc<C>,
    {
        let mut inner = self.inner.lock();
        let queue = self.assign_queue_locked(&mut inner, None)?;
        let slab = Arc::clone(&self.slab);
        let call = self
            .slab
            .insert_with(|key| make(CallSlot::new(queue, slab, key)))?;

        let handle = CallHandle::new(call);
        let entry: Weak<CallHandle<C>> = Arc::downgrade(&handle);
        inner.registry.register(entry);
        Ok(handle)
    }

    /// Create an engine-owned call (a server responder)
    ///
    /// Bound to `queue` when given, round-robin otherwise. Nothing but the
    /// slab keeps the call alive; the registry observes the call itself.
    pub fn spawn_call<C, F>(&self, queue: Option<&Arc<CompletionQueue>>, make: F) -> Result<Arc<C>>
    where
        C: Handler + Closeable + 'static,
        F: FnOnce(CallSlot) -> Arc<C>,
    {
        let mut inner = self.inner.lock();
        let queue = self.assign_queue_locked(&mut inner, queue)?;
        let slab = Arc::clone(&self.slab);
        let call = self
            .slab
            .insert_with(|key| make(CallSlot::new(queue, slab, key)))?;

        let entry: Weak<C> = Arc::downgrade(&call);
        inner.registry.register(entry);
        Ok(call)
    }

    /// Create an unarmed alarm
    pub fn create_alarm(&self) -> Result<Handle<Alarm>> {
        let timers = self.timers()?;
        self.create_call(|slot| Alarm::new(slot, timers))
    }

    fn assign_queue_locked(
        &self,
        inner: &mut EngineInner,
        fixed: Option<&Arc<CompletionQueue>>,
    ) -> Result<Arc<CompletionQueue>> {
        match inner.state {
            EngineState::Idle => return Err(Error::NotStarted),
            EngineState::ShutDown => return Err(Error::ShutDown),
            EngineState::Running => {}
        }

        let removed = inner.registry.collect();
        if removed > 0 {
            tracing::trace!(engine = self.name, removed, "registry collected");
        }

        if let Some(queue) = fixed {
            return Ok(Arc::clone(queue));
        }

        let pool = inner.pool.as_ref().ok_or(Error::NotStarted)?;
        let queue = Arc::clone(pool.queue(inner.next_id as usize));
        inner.next_id += 1;
        Ok(queue)
    }

    /// Every event-loop queue, in index order
    pub fn queues(&self) -> Result<Vec<Arc<CompletionQueue>>> {
        let inner = self.inner.lock();
        match inner.state {
            EngineState::Idle => Err(Error::NotStarted),
            EngineState::ShutDown => Err(Error::ShutDown),
            EngineState::Running => Ok(inner
                .pool
                .as_ref()
                .map(|p| p.queues().to_vec())
                .unwrap_or_default()),
        }
    }

    fn timers(&self) -> Result<Arc<TimerService>> {
        let inner = self.inner.lock();
        match inner.state {
            EngineState::Idle => Err(Error::NotStarted),
            EngineState::ShutDown => Err(Error::ShutDown),
            EngineState::Running => inner.timers.clone().ok_or(Error::NotStarted),
        }
    }

    /// Registry entries currently held, expired ones included until the
    /// next collection pass
    pub fn registry_len(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Calls still reachable from the event loops
    pub fn live_calls(&self) -> usize {
        self.slab.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().state == EngineState::Running
    }

    /// Set once shutdown begins; responders poll it without the manager lock
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Close every call and stop every thread
    ///
    /// Idempotent: later calls return immediately. Blocks until all event
    /// loops have exited, except the calling one when invoked from inside a
    /// callback.
    pub fn shutdown(&self) {
        let (live, pool, timers) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            if previous == EngineState::ShutDown {
                return;
            }
            inner.state = EngineState::ShutDown;
            self.shutdown_flag.store(true, Ordering::Release);

            if previous == EngineState::Idle {
                tracing::debug!(engine = self.name, "shut down before start");
                return;
            }
            (
                inner.registry.take_live(),
                inner.pool.take(),
                inner.timers.take(),
            )
        };

        tracing::info!(engine = self.name, calls = live.len(), "shutdown started");

        for call in &live {
            call.close();
        }
        drop(live);
        tracing::debug!(engine = self.name, "all calls closed");

        if let Some(timers) = timers {
            timers.shutdown();
        }

        if let Some(pool) = pool {
            pool.shutdown_queues();
            tracing::debug!(engine = self.name, "queues shut down");
            let stats = pool.join();
            tracing::debug!(
                engine = self.name,
                dispatched = stats.dispatched,
                stale = stats.stale,
                "event loops joined"
            );
        }

        let leftover = self.slab.clear();
        if !leftover.is_empty() {
            tracing::debug!(engine = self.name, calls = leftover.len(), "dropping undrained calls");
        }
        drop(leftover);

        tracing::info!(engine = self.name, "shutdown finished");
    }
}
