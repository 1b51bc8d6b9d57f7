//! Timer thread
//!
//! The thread:
//! 1. Polls the backend for expired timers
//! 2. Posts each expiry to the timer's completion queue
//! 3. Sleeps until the next deadline (capped by a max poll interval), or
//!    until a newly scheduled timer becomes the earliest one

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use cqrpc_core::{CompletionQueue, Result, Tag};

use super::{HeapTimerBackend, TimerBackend, TimerEntry, TimerHandle};

/// Configuration for the timer thread
#[derive(Debug, Clone)]
pub struct TimerThreadConfig {
    /// Maximum time between polls even if no timer is due
    /// Default: 100ms
    pub max_poll_interval: Duration,

    /// Minimum sleep time (prevents busy-spinning)
    /// Default: 50µs
    pub min_sleep: Duration,

    /// Default: "cqrpc-timer"
    pub thread_name: String,

    /// Stack size for timer thread (None = system default)
    pub stack_size: Option<usize>,
}

impl Default for TimerThreadConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_millis(100),
            min_sleep: Duration::from_micros(50),
            thread_name: "cqrpc-timer".into(),
            stack_size: None,
        }
    }
}

impl TimerThreadConfig {
    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            max_poll_interval: Duration::from_millis(1),
            min_sleep: Duration::from_micros(10),
            ..Self::default()
        }
    }

    /// Create config optimized for low CPU usage
    pub fn low_cpu() -> Self {
        Self {
            max_poll_interval: Duration::from_secs(1),
            min_sleep: Duration::from_micros(500),
            ..Self::default()
        }
    }
}

/// Statistics from timer thread execution
#[derive(Debug, Clone, Default)]
pub struct TimerStats {
    /// Total poll iterations
    pub poll_count: u64,

    /// Total timers fired
    pub timers_fired: u64,

    /// Maximum batch size (timers fired in single poll)
    pub max_batch_size: usize,
}

#[derive(Default)]
struct SignalState {
    wake_pending: bool,
    shutdown: bool,
}

/// Sleep/wake channel for the timer thread
#[derive(Default)]
struct TimerSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl TimerSignal {
    /// Sleep up to `timeout`; returns false once shutdown is requested
    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.wake_pending && !state.shutdown {
            self.condvar.wait_for(&mut state, timeout);
        }
        state.wake_pending = false;
        !state.shutdown
    }

    fn wake(&self) {
        self.state.lock().wake_pending = true;
        self.condvar.notify_one();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.condvar.notify_one();
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Running timer thread plus the backend it polls
pub struct TimerService {
    backend: Arc<dyn TimerBackend>,
    signal: Arc<TimerSignal>,
    thread: Mutex<Option<JoinHandle<TimerStats>>>,
}

impl TimerService {
    /// Spawn a timer thread over a fresh heap backend
    pub fn spawn(config: TimerThreadConfig) -> Result<Self> {
        Self::spawn_with(Arc::new(HeapTimerBackend::new()), config)
    }

    pub fn spawn_with(backend: Arc<dyn TimerBackend>, config: TimerThreadConfig) -> Result<Self> {
        let signal = Arc::new(TimerSignal::default());

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let loop_backend = Arc::clone(&backend);
        let loop_signal = Arc::clone(&signal);
        let handle = builder.spawn(move || timer_loop(loop_backend, loop_signal, config))?;

        tracing::debug!(backend = backend.name(), "timer thread started");

        Ok(Self {
            backend,
            signal,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Arm a timer posting `(tag, true)` to `queue` after `after`
    pub fn schedule(&self, queue: Arc<CompletionQueue>, tag: Tag, after: Duration) -> TimerHandle {
        let entry = TimerEntry::after(queue, tag, after);
        let earliest = self
            .backend
            .next_deadline()
            .map_or(true, |d| entry.deadline < d);
        let handle = self.backend.insert(entry);
        if earliest {
            self.signal.wake();
        }
        handle
    }

    /// Cancel a timer; true if it had not fired yet
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.backend.cancel(handle)
    }

    /// Pending timers
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_shutdown()
    }

    /// Stop the thread and wait for it; `None` if already stopped
    pub fn shutdown(&self) -> Option<TimerStats> {
        self.signal.shutdown();
        let handle = self.thread.lock().take()?;
        match handle.join() {
            Ok(stats) => {
                tracing::debug!(
                    fired = stats.timers_fired,
                    polls = stats.poll_count,
                    "timer thread stopped"
                );
                Some(stats)
            }
            Err(_) => {
                tracing::error!("timer thread panicked");
                None
            }
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Main timer loop
fn timer_loop(
    backend: Arc<dyn TimerBackend>,
    signal: Arc<TimerSignal>,
    config: TimerThreadConfig,
) -> TimerStats {
    let mut stats = TimerStats::default();

    loop {
        let expired = backend.poll_expired(Instant::now());
        let batch_size = expired.len();

        stats.poll_count += 1;
        stats.timers_fired += batch_size as u64;
        stats.max_batch_size = stats.max_batch_size.max(batch_size);

        for timer in expired {
            tracing::trace!(tag = %timer.tag, handle = timer.handle.raw(), "timer fired");
            timer.fire();
        }

        let sleep = calculate_sleep(backend.as_ref(), &config);
        if !signal.wait(sleep) {
            break;
        }
    }

    stats
}

/// Calculate how long to sleep before next poll
#[inline]
fn calculate_sleep(backend: &dyn TimerBackend, config: &TimerThreadConfig) -> Duration {
    match backend.next_deadline() {
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Duration::ZERO
            } else {
                (deadline - now)
                    .min(config.max_poll_interval)
                    .max(config.min_sleep)
            }
        }
        None => config.max_poll_interval,
    }
}
