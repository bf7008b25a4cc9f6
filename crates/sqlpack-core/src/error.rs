//! Error types for packaging and applying migrations.

use std::path::PathBuf;

use crate::compiler::CompileError;
use crate::processor::ProcessorError;
use crate::version::Version;

/// Errors that can occur while discovering, packaging, loading or applying
/// migrations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The script directory does not exist.
    #[error("Script directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// A script filename is not a `YYYYMMDDHHmm` version token.
    #[error("Invalid migration version in '{path}': {reason}")]
    InvalidVersionFormat {
        /// Path of the offending script.
        path: PathBuf,
        /// Why the stem was rejected.
        reason: String,
    },

    /// Two migrations carry the same version token.
    #[error("Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        /// The shared version.
        version: Version,
        /// The first migration seen with this version.
        first: String,
        /// The second migration seen with this version.
        second: String,
    },

    /// Building a package failed. The staging directory is left in place.
    #[error("Package build failed (staging directory {staging}): {cause}")]
    PackageBuild {
        /// Staging directory holding the partial build.
        staging: PathBuf,
        /// What went wrong.
        cause: BuildCause,
    },

    /// A package could not be loaded.
    #[error("Failed to load package '{path}': {reason}")]
    PackageLoad {
        /// Path of the package.
        path: PathBuf,
        /// Why loading failed.
        reason: String,
    },

    /// A migration's SQL failed against the database.
    #[error("Migration {version} ({name}) failed: {source}")]
    Apply {
        /// Version of the failing migration.
        version: Version,
        /// Name of the failing migration.
        name: String,
        /// Database diagnostic.
        #[source]
        source: ProcessorError,
    },

    /// A processor operation did not finish in time.
    #[error("Processor timed out after {seconds}s during {operation}")]
    ProcessorTimeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured bound.
        seconds: u64,
    },

    /// Ledger or transaction-control failure outside a migration's SQL.
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// The run was cancelled between migrations.
    #[error("Migration run cancelled")]
    Cancelled,

    /// IO error while reading the script directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The failure behind [`Error::PackageBuild`].
#[derive(Debug, thiserror::Error)]
pub enum BuildCause {
    /// The staging directory could not be created.
    #[error("cannot create staging directory: {0}")]
    Stage(#[source] std::io::Error),

    /// A script could not be copied into staging.
    #[error("cannot copy '{path}': {source}")]
    Copy {
        /// Script being copied.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A unit definition could not be written.
    #[error("cannot write unit '{path}': {reason}")]
    WriteUnit {
        /// Unit file path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// The compiler rejected the request.
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Result type for sqlpack operations.
pub type Result<T> = std::result::Result<T, Error>;
