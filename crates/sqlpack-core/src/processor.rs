//! Database processor capability.
//!
//! The runner never talks to a database directly. It drives a [`Processor`]
//! which owns one connection to the target and the ledger table inside it.
//! Engine bindings live in their own crates (see `sqlpack-sqlite`).

use std::time::Duration;

use async_trait::async_trait;

use crate::version::Version;

/// Default bound on each processor operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_mins(1);

/// Boxed error from a database driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Options passed with every [`Processor::apply`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Announce but do not execute.
    pub preview_only: bool,
    /// Bound on each operation.
    pub timeout: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            preview_only: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A failure reported by a processor.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ProcessorError {
    /// Creates an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a driver error, keeping it as the source.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self {
            message: format!("{}: {source}", message.into()),
            source: Some(source),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Executes SQL against one database and maintains its ledger.
///
/// Implementations own a single connection. Transaction control is explicit
/// so the runner decides whether each migration gets its own transaction or
/// all of them share one.
#[async_trait]
pub trait Processor: Send {
    /// Engine name for logging.
    fn engine(&self) -> &'static str;

    /// Creates the ledger table if it does not exist.
    async fn ensure_ledger(&mut self) -> Result<(), ProcessorError>;

    /// Returns whether `version` is recorded in the ledger.
    ///
    /// Must return `false` rather than fail when the ledger does not exist
    /// yet, so preview runs work against a fresh database.
    async fn is_version_recorded(&mut self, version: Version) -> Result<bool, ProcessorError>;

    /// Opens a transaction.
    async fn begin(&mut self) -> Result<(), ProcessorError>;

    /// Executes a SQL script. With `options.preview_only` nothing is executed.
    async fn apply(&mut self, sql: &str, options: &ProcessorOptions) -> Result<(), ProcessorError>;

    /// Records `version` as applied.
    async fn record_version(&mut self, version: Version, name: &str) -> Result<(), ProcessorError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), ProcessorError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), ProcessorError>;
}
