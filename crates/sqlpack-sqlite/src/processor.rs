//! SQLite processor.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Executor};
use tracing::{debug, info};

use sqlpack_core::processor::{Processor, ProcessorError, ProcessorOptions};
use sqlpack_core::Version;

use crate::ledger;

/// Applies migrations to a SQLite database over a single connection.
pub struct SqliteProcessor {
    conn: SqliteConnection,
}

impl SqliteProcessor {
    /// Opens `url` (e.g. `sqlite:app.db` or `sqlite::memory:`), creating the
    /// database file if missing. `busy_timeout` bounds waits on locked
    /// databases.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] if the URL is invalid or the database
    /// cannot be opened.
    pub async fn connect(url: &str, busy_timeout: Duration) -> Result<Self, ProcessorError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ProcessorError::with_source("invalid SQLite connection string", e))?
            .create_if_missing(true)
            .busy_timeout(busy_timeout);

        let conn = options
            .connect()
            .await
            .map_err(|e| ProcessorError::with_source("cannot open SQLite database", e))?;

        info!(url = %url, "Connected to SQLite");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an open connection.
    #[must_use]
    pub const fn from_connection(conn: SqliteConnection) -> Self {
        Self { conn }
    }

    /// Returns the underlying connection.
    pub const fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Returns every version recorded in the ledger, ascending.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] if the ledger cannot be read.
    pub async fn recorded_versions(&mut self) -> Result<Vec<Version>, ProcessorError> {
        ledger::recorded_versions(&mut self.conn).await
    }

    async fn control(&mut self, statement: &'static str) -> Result<(), ProcessorError> {
        debug!(statement, "Transaction control");
        sqlx::query(statement)
            .execute(&mut self.conn)
            .await
            .map_err(|e| ProcessorError::with_source(format!("{statement} failed"), e))?;
        Ok(())
    }
}

#[async_trait]
impl Processor for SqliteProcessor {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_ledger(&mut self) -> Result<(), ProcessorError> {
        ledger::ensure_table(&mut self.conn).await
    }

    async fn is_version_recorded(&mut self, version: Version) -> Result<bool, ProcessorError> {
        ledger::is_recorded(&mut self.conn, version).await
    }

    async fn begin(&mut self) -> Result<(), ProcessorError> {
        self.control("BEGIN").await
    }

    async fn apply(&mut self, sql: &str, options: &ProcessorOptions) -> Result<(), ProcessorError> {
        if options.preview_only {
            debug!(sql = %sql, "Preview only, not executing");
            return Ok(());
        }

        debug!(sql = %sql, "Executing SQL");
        Executor::execute(&mut self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| ProcessorError::with_source("SQL execution failed", e))?;
        Ok(())
    }

    async fn record_version(&mut self, version: Version, name: &str) -> Result<(), ProcessorError> {
        ledger::record(&mut self.conn, version, name).await
    }

    async fn commit(&mut self) -> Result<(), ProcessorError> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), ProcessorError> {
        self.control("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_processor() -> SqliteProcessor {
        SqliteProcessor::connect("sqlite::memory:", Duration::from_secs(5))
            .await
            .expect("Failed to open in-memory SQLite")
    }

    async fn table_exists(processor: &mut SqliteProcessor, name: &str) -> bool {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(name)
                .fetch_optional(processor.connection())
                .await
                .unwrap();
        row.is_some()
    }

    #[tokio::test]
    async fn test_apply_multi_statement_script() {
        let mut processor = create_test_processor().await;

        processor
            .apply(
                "CREATE TABLE a (id INTEGER); CREATE TABLE b (id INTEGER);",
                &ProcessorOptions::default(),
            )
            .await
            .unwrap();

        assert!(table_exists(&mut processor, "a").await);
        assert!(table_exists(&mut processor, "b").await);
    }

    #[tokio::test]
    async fn test_apply_through_trait_object() {
        let mut processor = create_test_processor().await;

        {
            let dynamic: &mut dyn Processor = &mut processor;
            dynamic
                .apply(
                    "CREATE TABLE a (id INTEGER); INSERT INTO a (id) VALUES (1), (2);",
                    &ProcessorOptions::default(),
                )
                .await
                .unwrap();
        }

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM a")
            .fetch_one(processor.connection())
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_preview_executes_nothing() {
        let mut processor = create_test_processor().await;
        let options = ProcessorOptions {
            preview_only: true,
            ..ProcessorOptions::default()
        };

        processor
            .apply("CREATE TABLE a (id INTEGER);", &options)
            .await
            .unwrap();

        assert!(!table_exists(&mut processor, "a").await);
    }

    #[tokio::test]
    async fn test_rollback_discards_script_and_record() {
        let mut processor = create_test_processor().await;
        processor.ensure_ledger().await.unwrap();
        let version: Version = "201801010000".parse().unwrap();

        processor.begin().await.unwrap();
        processor
            .apply("CREATE TABLE a (id INTEGER);", &ProcessorOptions::default())
            .await
            .unwrap();
        processor.record_version(version, "201801010000").await.unwrap();
        processor.rollback().await.unwrap();

        assert!(!table_exists(&mut processor, "a").await);
        assert!(!processor.is_version_recorded(version).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_keeps_script_and_record() {
        let mut processor = create_test_processor().await;
        processor.ensure_ledger().await.unwrap();
        let version: Version = "201801010000".parse().unwrap();

        processor.begin().await.unwrap();
        processor
            .apply("CREATE TABLE a (id INTEGER);", &ProcessorOptions::default())
            .await
            .unwrap();
        processor.record_version(version, "201801010000").await.unwrap();
        processor.commit().await.unwrap();

        assert!(table_exists(&mut processor, "a").await);
        assert_eq!(processor.recorded_versions().await.unwrap(), vec![version]);
    }

    #[tokio::test]
    async fn test_bad_sql_reports_driver_error() {
        let mut processor = create_test_processor().await;

        let err = processor
            .apply("CREATE TABLE (", &ProcessorOptions::default())
            .await
            .unwrap_err();

        assert!(err.message().starts_with("SQL execution failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = SqliteProcessor::connect("postgres://localhost/db", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
