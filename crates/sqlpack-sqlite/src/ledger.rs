//! Applied-migration ledger.
//!
//! The `sqlpack_migrations` table records which versions have been applied
//! to the database. Rows are written on the migration's own connection so
//! they commit or roll back together with the migration.

use sqlx::sqlite::SqliteConnection;
use sqlpack_core::processor::ProcessorError;
use sqlpack_core::Version;

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "sqlpack_migrations";

/// SQL to create the ledger table.
pub const CREATE_LEDGER_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS sqlpack_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

fn db_error(context: &'static str, err: sqlx::Error) -> ProcessorError {
    ProcessorError::with_source(context, err)
}

fn version_param(version: Version) -> Result<i64, ProcessorError> {
    i64::try_from(version.get())
        .map_err(|_| ProcessorError::new(format!("version {version} does not fit the ledger")))
}

/// Creates the ledger table if needed.
///
/// # Errors
///
/// Returns a [`ProcessorError`] if the table cannot be created.
pub async fn ensure_table(conn: &mut SqliteConnection) -> Result<(), ProcessorError> {
    sqlx::query(CREATE_LEDGER_TABLE_SQL)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("cannot create ledger table", e))?;
    Ok(())
}

/// Returns whether the ledger table exists.
///
/// # Errors
///
/// Returns a [`ProcessorError`] if the schema cannot be inspected.
pub async fn exists(conn: &mut SqliteConnection) -> Result<bool, ProcessorError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(LEDGER_TABLE)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| db_error("cannot inspect schema", e))?;
    Ok(row.is_some())
}

/// Returns whether `version` is recorded. A missing ledger records nothing.
///
/// # Errors
///
/// Returns a [`ProcessorError`] if the ledger cannot be read.
pub async fn is_recorded(
    conn: &mut SqliteConnection,
    version: Version,
) -> Result<bool, ProcessorError> {
    if !exists(conn).await? {
        return Ok(false);
    }
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sqlpack_migrations WHERE version = ?")
        .bind(version_param(version)?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("cannot read ledger", e))?;
    Ok(row.is_some())
}

/// Records `version` as applied.
///
/// # Errors
///
/// Returns a [`ProcessorError`] if the row cannot be inserted, including
/// when `version` is already recorded.
pub async fn record(
    conn: &mut SqliteConnection,
    version: Version,
    name: &str,
) -> Result<(), ProcessorError> {
    sqlx::query("INSERT INTO sqlpack_migrations (version, name) VALUES (?, ?)")
        .bind(version_param(version)?)
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("cannot record migration", e))?;
    Ok(())
}

/// Returns every recorded version in ascending order.
///
/// # Errors
///
/// Returns a [`ProcessorError`] if the ledger cannot be read or holds a
/// value that is not a valid version.
pub async fn recorded_versions(conn: &mut SqliteConnection) -> Result<Vec<Version>, ProcessorError> {
    if !exists(conn).await? {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT version FROM sqlpack_migrations ORDER BY version")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("cannot read ledger", e))?;

    rows.into_iter()
        .map(|(raw,)| {
            u64::try_from(raw)
                .ok()
                .and_then(|v| Version::try_from(v).ok())
                .ok_or_else(|| ProcessorError::new(format!("ledger holds invalid version {raw}")))
        })
        .collect()
}
