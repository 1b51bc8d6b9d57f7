//! Manager configuration

use cqrpc_core::env::{env_get, env_get_ms, env_get_opt};
use cqrpc_core::{Error, Result};

use crate::timer::TimerThreadConfig;

/// Default arena capacity (live calls per manager)
pub const DEFAULT_MAX_CALLS: usize = 64 * 1024;

/// Upper bound on event-loop threads
pub const MAX_THREADS: usize = 256;

/// Configuration shared by the client manager and the server
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of event-loop threads, one completion queue each
    pub threads: usize,

    /// Maximum number of live calls (handler slab capacity)
    pub max_calls: usize,

    /// Event-loop thread name prefix; threads are named `{prefix}-{i}`
    pub thread_name: String,

    /// Timer thread driving alarms
    pub timer: TimerThreadConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            threads: num_cpus.min(MAX_THREADS),
            max_calls: DEFAULT_MAX_CALLS,
            thread_name: "cqrpc-loop".into(),
            timer: TimerThreadConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `CQRPC_THREADS`, `CQRPC_MAX_CALLS` and
    /// `CQRPC_TIMER_POLL_MS`
    pub fn from_env() -> Self {
        let base = Self::default();
        let mut timer = base.timer.clone();
        timer.max_poll_interval = env_get_ms("CQRPC_TIMER_POLL_MS", timer.max_poll_interval);

        Self {
            threads: env_get_opt::<usize>("CQRPC_THREADS").unwrap_or(base.threads),
            max_calls: env_get("CQRPC_MAX_CALLS", base.max_calls),
            timer,
            ..base
        }
    }

    /// Set number of event-loop threads; checked by [`validate`](Self::validate)
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Set maximum number of live calls
    pub fn max_calls(mut self, n: usize) -> Self {
        self.max_calls = n;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub fn timer(mut self, timer: TimerThreadConfig) -> Self {
        self.timer = timer;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be at least 1"));
        }
        if self.threads > MAX_THREADS {
            return Err(Error::InvalidConfig("threads exceeds maximum"));
        }
        if self.max_calls == 0 {
            return Err(Error::InvalidConfig("max_calls must be at least 1"));
        }
        if self.timer.max_poll_interval.is_zero() {
            return Err(Error::InvalidConfig("timer poll interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    fn test_default_is_valid() {
        let config = ManagerConfig::default();
        assert!(config.threads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new()
            .threads(3)
            .max_calls(10)
            .thread_name("test-loop");
        assert_eq!(config.threads, 3);
        assert_eq!(config.max_calls, 10);
        assert_eq!(config.thread_name, "test-loop");
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(ManagerConfig::new().threads(0).validate().is_err());
        assert!(ManagerConfig::new().max_calls(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_too_many_threads() {
        let config = ManagerConfig::new().threads(MAX_THREADS + 1);
        assert_eq!(config.threads, MAX_THREADS + 1);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig("threads exceeds maximum"))
        ));
        assert!(ManagerConfig::new().threads(MAX_THREADS).validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("CQRPC_THREADS", "2");
        std::env::set_var("CQRPC_MAX_CALLS", "128");
        std::env::set_var("CQRPC_TIMER_POLL_MS", "7");

        let config = ManagerConfig::from_env();
        assert_eq!(config.threads, 2);
        assert_eq!(config.max_calls, 128);
        assert_eq!(config.timer.max_poll_interval, Duration::from_millis(7));

        std::env::remove_var("CQRPC_THREADS");
        std::env::remove_var("CQRPC_MAX_CALLS");
        std::env::remove_var("CQRPC_TIMER_POLL_MS");
    }
}
