//! Session-tagged logging, built on the `log` facade.
//!
//! The engine never installs a logger itself — callers (and, in this
//! crate, the integration tests) wire up `env_logger` or any other
//! `log`-compatible backend. Each session carries a short tag so that
//! several concurrent calls in one process stay distinguishable in a
//! shared log stream, the same role `logging_state_t`'s tag played in
//! the teacher's FFI wrapper.

use std::fmt;

/// A per-session log tag, prefixed onto every message the engine emits.
#[derive(Debug, Clone)]
pub struct SessionTag(String);

impl SessionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }
}

impl Default for SessionTag {
    fn default() -> Self {
        Self::new("t30")
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Emits a `log::trace!` line prefixed with the session tag. Used for
/// high-volume, per-sample-tick and per-bit events.
macro_rules! t30_trace {
    ($tag:expr, $($arg:tt)+) => {
        log::trace!("[{}] {}", $tag, format!($($arg)+))
    };
}

/// Emits a `log::debug!` line prefixed with the session tag. Used for
/// state transitions and frame send/receive events.
macro_rules! t30_debug {
    ($tag:expr, $($arg:tt)+) => {
        log::debug!("[{}] {}", $tag, format!($($arg)+))
    };
}

/// Emits a `log::warn!` line prefixed with the session tag. Used for
/// recoverable protocol anomalies (bad FCS, unexpected frames, retries).
macro_rules! t30_warn {
    ($tag:expr, $($arg:tt)+) => {
        log::warn!("[{}] {}", $tag, format!($($arg)+))
    };
}

pub(crate) use t30_debug;
pub(crate) use t30_trace;
pub(crate) use t30_warn;
