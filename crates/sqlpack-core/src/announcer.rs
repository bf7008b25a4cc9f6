//! Progress announcements.
//!
//! An [`Announcer`] is the operator-facing narration of a build or run. It is
//! separate from `tracing` logs: announcements are the product's output,
//! logs are diagnostics.

use std::sync::{Mutex, PoisonError};

use tracing::info;

/// One-way progress sink.
pub trait Announcer: Send + Sync {
    /// Emits one line. Must not block indefinitely.
    fn announce(&self, line: &str);
}

/// Writes announcements to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleAnnouncer;

impl Announcer for ConsoleAnnouncer {
    fn announce(&self, line: &str) {
        println!("{line}");
    }
}

/// Forwards announcements to the `tracing` subscriber at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnnouncer;

impl Announcer for TracingAnnouncer {
    fn announce(&self, line: &str) {
        info!("{line}");
    }
}

/// Keeps announcements in memory.
#[derive(Debug, Default)]
pub struct BufferAnnouncer {
    lines: Mutex<Vec<String>>,
}

impl BufferAnnouncer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line announced so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Announcer for BufferAnnouncer {
    fn announce(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Discards announcements.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAnnouncer;

impl Announcer for SilentAnnouncer {
    fn announce(&self, _line: &str) {}
}
