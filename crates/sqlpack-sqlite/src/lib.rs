//! SQLite bindings for sqlpack.
//!
//! Provides [`SqliteProcessor`], the [`Processor`](sqlpack_core::processor::Processor)
//! that applies packaged migrations to a SQLite database through sqlx, and
//! the ledger table it maintains.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use sqlpack_core::prelude::*;
//! use sqlpack_sqlite::SqliteProcessor;
//!
//! let mut processor = SqliteProcessor::connect("sqlite:app.db", Duration::from_mins(1)).await?;
//! let package = load_package("app.sqlpack".as_ref())?;
//! MigrationRunner::new(&mut processor, &ConsoleAnnouncer)
//!     .migrate_up(package.migrations)
//!     .await?;
//! ```

pub mod ledger;
mod processor;

pub use processor::SqliteProcessor;
