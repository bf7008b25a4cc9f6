//! Package timestamped SQL scripts into a migration unit, then apply it.
//!
//! `sqlpack-core` holds the engine-agnostic half of sqlpack:
//!
//! - **Discovery** - finds `<YYYYMMDDHHmm>.sql` scripts and validates their
//!   versions
//! - **Builder** - stages one unit definition and one resource per script and
//!   hands them to a [`compiler::Compiler`]
//! - **Loader** - reads a package back into runnable [`Migration`]s
//! - **Runner** - applies pending migrations in version order through a
//!   [`processor::Processor`], recording each one in the ledger
//!
//! Database bindings implement [`processor::Processor`] in their own crates.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlpack_core::prelude::*;
//!
//! // Build time
//! let builder = PackageBuilder::new(vec![Reference::runtime()]);
//! let outcome = builder.build_from_dir("migrations".as_ref(), "app.sqlpack".as_ref(), &ConsoleAnnouncer)?;
//! println!("{}", outcome.staging.display());
//!
//! // Run time
//! let package = load_package("app.sqlpack".as_ref())?;
//! let mut runner = MigrationRunner::new(&mut processor, &ConsoleAnnouncer);
//! runner.migrate_up(package.migrations).await?;
//! ```

pub mod announcer;
pub mod builder;
pub mod compiler;
pub mod discover;
pub mod error;
pub mod loader;
pub mod migration;
pub mod package;
pub mod processor;
pub mod runner;
pub mod version;

pub use error::{BuildCause, Error, Result};
pub use migration::{Migration, MigrationAction};
pub use version::Version;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::announcer::{
        Announcer, BufferAnnouncer, ConsoleAnnouncer, SilentAnnouncer, TracingAnnouncer,
    };
    pub use crate::builder::{BuildOutcome, PackageBuilder};
    pub use crate::compiler::{ArchiveCompiler, CompileError, CompileRequest, Compiler};
    pub use crate::discover::{discover_scripts, ScriptFile};
    pub use crate::error::{BuildCause, Error, Result};
    pub use crate::loader::{load_package, LoadedPackage};
    pub use crate::migration::{Migration, MigrationAction};
    pub use crate::package::{Package, Reference};
    pub use crate::processor::{Processor, ProcessorError, ProcessorOptions};
    pub use crate::runner::{
        MigrationRunner, MigrationState, MigrationStatus, RunReport, RunnerOptions,
        TransactionMode,
    };
    pub use crate::version::Version;
}
