//! Environment variable helpers
//!
//! Typed lookups with defaults, used to layer `CQRPC_*` overrides on top of
//! programmatic configuration.
//!
//! ```ignore
//! use cqrpc_core::env::{env_get, env_get_ms};
//!
//! let threads: usize = env_get("CQRPC_THREADS", 4);
//! let poll = env_get_ms("CQRPC_TIMER_POLL_MS", Duration::from_millis(5));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default`
///
/// A set-but-unparsable value falls back to the default with a warning.
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse `key` as `T` if set and valid
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean lookup; "1", "true", "yes", "on" (any case) are true
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Duration given in whole milliseconds
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}
