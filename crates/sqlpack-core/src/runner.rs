//! Migration runner.
//!
//! Applies loaded migrations in ascending version order through a
//! [`Processor`], skipping versions already in the ledger. Each migration
//! goes `Pending -> Applying -> Applied`, or `Failed`, which rolls back the
//! open transaction and aborts the run.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::announcer::Announcer;
use crate::error::{Error, Result};
use crate::migration::Migration;
use crate::processor::{Processor, ProcessorError, ProcessorOptions, DEFAULT_TIMEOUT};
use crate::version::Version;

/// How migrations are grouped into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    /// One transaction per migration, committed before the next starts.
    #[default]
    PerMigration,
    /// One transaction spanning every pending migration.
    Single,
}

impl FromStr for TransactionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per-migration" => Ok(Self::PerMigration),
            "single" => Ok(Self::Single),
            other => Err(format!(
                "unknown transaction mode '{other}' (expected 'per-migration' or 'single')"
            )),
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerMigration => "per-migration",
            Self::Single => "single",
        })
    }
}

/// Runner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Announce what would happen without executing or recording anything.
    pub preview_only: bool,
    /// Bound on each processor operation.
    pub timeout: Duration,
    /// Transaction grouping.
    pub transaction_mode: TransactionMode,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            preview_only: false,
            timeout: DEFAULT_TIMEOUT,
            transaction_mode: TransactionMode::default(),
        }
    }
}

impl RunnerOptions {
    const fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            preview_only: self.preview_only,
            timeout: self.timeout,
        }
    }
}

/// Lifecycle of one migration within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Not yet looked at.
    Pending,
    /// Being executed.
    Applying,
    /// Executed and recorded.
    Applied,
    /// Found in the ledger and skipped.
    AlreadyApplied,
    /// Walked through in preview mode.
    Previewed,
    /// Execution failed; the run aborted.
    Failed,
}

/// Final state of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Migration version.
    pub version: Version,
    /// Migration name.
    pub name: String,
    /// Terminal state.
    pub state: MigrationState,
}

/// Summary of a completed run, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// One entry per migration.
    pub outcomes: Vec<MigrationOutcome>,
}

impl RunReport {
    fn count(&self, state: MigrationState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Number of migrations applied in this run.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(MigrationState::Applied)
    }

    /// Number of migrations skipped because they were already applied.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(MigrationState::AlreadyApplied)
    }

    /// Number of migrations walked through in preview mode.
    #[must_use]
    pub fn previewed(&self) -> usize {
        self.count(MigrationState::Previewed)
    }

    /// Versions applied in this run, in order.
    #[must_use]
    pub fn applied_versions(&self) -> Vec<Version> {
        self.outcomes
            .iter()
            .filter(|o| o.state == MigrationState::Applied)
            .map(|o| o.version)
            .collect()
    }
}

/// Whether a migration is recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration version.
    pub version: Version,
    /// Migration name.
    pub name: String,
    /// Whether the ledger records it.
    pub applied: bool,
}

/// Applies migrations against one processor.
pub struct MigrationRunner<'a> {
    processor: &'a mut dyn Processor,
    announcer: &'a dyn Announcer,
    options: RunnerOptions,
    cancel: CancellationToken,
}

impl<'a> MigrationRunner<'a> {
    /// Creates a runner with default options.
    pub fn new(processor: &'a mut dyn Processor, announcer: &'a dyn Announcer) -> Self {
        Self {
            processor,
            announcer,
            options: RunnerOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the runner options.
    #[must_use]
    pub const fn options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Stops the run between migrations once `token` is cancelled.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Applies every migration not yet in the ledger, in ascending version
    /// order.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateVersion`] before anything runs.
    /// - [`Error::Apply`] when a migration's SQL fails; its transaction is
    ///   rolled back and later migrations are not attempted.
    /// - [`Error::ProcessorTimeout`] when an operation exceeds the timeout.
    /// - [`Error::Processor`] for ledger or transaction-control failures.
    /// - [`Error::Cancelled`] when cancelled between migrations.
    pub async fn migrate_up(&mut self, mut migrations: Vec<Migration>) -> Result<RunReport> {
        sort_migrations(&mut migrations)?;

        let preview = self.options.preview_only;
        info!(
            engine = self.processor.engine(),
            migrations = migrations.len(),
            preview,
            mode = %self.options.transaction_mode,
            "Starting migration run"
        );
        if preview {
            self.announcer
                .announce("Preview only: nothing will be executed or recorded");
        }

        if !preview {
            bounded(
                self.options.timeout,
                "ledger setup",
                self.processor.ensure_ledger(),
            )
            .await?;
        }

        let mut report = RunReport::default();
        let mut tx_open = false;
        if let Err(err) = self.run_all(&migrations, &mut report, &mut tx_open).await {
            if tx_open {
                self.rollback_after_failure().await;
            }
            return Err(err);
        }

        let pending = report.outcomes.len() - report.skipped();
        self.announcer.announce(&format!(
            "{pending} pending, {} already applied",
            report.skipped()
        ));
        info!(
            applied = report.applied(),
            skipped = report.skipped(),
            previewed = report.previewed(),
            "Migration run finished"
        );
        Ok(report)
    }

    async fn run_all(
        &mut self,
        migrations: &[Migration],
        report: &mut RunReport,
        tx_open: &mut bool,
    ) -> Result<()> {
        let timeout = self.options.timeout;
        let per_migration = self.options.transaction_mode == TransactionMode::PerMigration;

        for migration in migrations {
            if self.cancel.is_cancelled() {
                self.announcer
                    .announce(&format!("Cancelled before {}", migration.label()));
                return Err(Error::Cancelled);
            }

            let recorded = bounded(
                timeout,
                "ledger lookup",
                self.processor.is_version_recorded(migration.version),
            )
            .await?;

            let state = if recorded {
                debug!(version = %migration.version, "Already applied, skipping");
                self.announcer
                    .announce(&format!("{} already applied, skipping", migration.label()));
                MigrationState::AlreadyApplied
            } else {
                if !self.options.preview_only && !*tx_open {
                    bounded(timeout, "begin transaction", self.processor.begin()).await?;
                    *tx_open = true;
                }

                let state = self.apply_one(migration).await?;

                if *tx_open && per_migration {
                    bounded(timeout, "commit", self.processor.commit()).await?;
                    *tx_open = false;
                }
                state
            };

            report.outcomes.push(MigrationOutcome {
                version: migration.version,
                name: migration.name.clone(),
                state,
            });
        }

        if *tx_open {
            bounded(timeout, "commit", self.processor.commit()).await?;
            *tx_open = false;
        }
        // A preview walks the same path without a transaction.
        let grouped = report.applied() + report.previewed();
        if !per_migration && grouped > 0 {
            self.announcer.announce(&format!(
                "Committed {grouped} migration(s) in one transaction"
            ));
        }
        Ok(())
    }

    /// Runs one migration's up action and records it, inside the caller's
    /// transaction.
    async fn apply_one(&mut self, migration: &Migration) -> Result<MigrationState> {
        let mut state = MigrationState::Pending;
        debug!(version = %migration.version, ?state, "Migration state");

        let started = Instant::now();
        let options = self.options.processor_options();
        state = MigrationState::Applying;
        info!(version = %migration.version, name = %migration.name, ?state, "Applying migration");
        self.announcer
            .announce(&format!("{} migrating", migration.label()));
        self.announcer
            .announce(&format!("=> {}", migration.up.describe()));

        if let Some(sql) = migration.up.sql() {
            let result = tokio::time::timeout(options.timeout, self.processor.apply(sql, &options))
                .await
                .map_err(|_| timed_out("apply", options.timeout))
                .and_then(|r| r.map_err(|source| apply_failed(migration, source)));

            if let Err(err) = result {
                state = MigrationState::Failed;
                warn!(version = %migration.version, ?state, error = %err, "Migration failed");
                self.announcer
                    .announce(&format!("{} failed: {err}", migration.label()));
                return Err(err);
            }
        }

        if options.preview_only {
            state = MigrationState::Previewed;
        } else {
            bounded(
                options.timeout,
                "ledger record",
                self.processor
                    .record_version(migration.version, &migration.name),
            )
            .await?;
            state = MigrationState::Applied;
        }

        info!(
            version = %migration.version,
            ?state,
            elapsed_ms = started.elapsed().as_millis(),
            "Migration done"
        );
        self.announcer
            .announce(&format!("{} migrated", migration.label()));
        Ok(state)
    }

    async fn rollback_after_failure(&mut self) {
        match bounded(self.options.timeout, "rollback", self.processor.rollback()).await {
            Ok(()) => {
                debug!("Transaction rolled back");
                self.announcer.announce("Rolled back open transaction");
            }
            Err(err) => warn!(error = %err, "Rollback failed"),
        }
    }

    /// Reports, in version order, whether each migration is in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateVersion`], [`Error::Processor`] or
    /// [`Error::ProcessorTimeout`].
    pub async fn status(&mut self, mut migrations: Vec<Migration>) -> Result<Vec<MigrationStatus>> {
        sort_migrations(&mut migrations)?;

        let mut statuses = Vec::with_capacity(migrations.len());
        for migration in migrations {
            let applied = bounded(
                self.options.timeout,
                "ledger lookup",
                self.processor.is_version_recorded(migration.version),
            )
            .await?;
            statuses.push(MigrationStatus {
                version: migration.version,
                name: migration.name,
                applied,
            });
        }
        Ok(statuses)
    }
}

/// Sorts by version and rejects duplicates.
fn sort_migrations(migrations: &mut [Migration]) -> Result<()> {
    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(Error::DuplicateVersion {
            version: pair[0].version,
            first: pair[0].name.clone(),
            second: pair[1].name.clone(),
        });
    }
    Ok(())
}

const fn timed_out(operation: &'static str, timeout: Duration) -> Error {
    Error::ProcessorTimeout {
        operation,
        seconds: timeout.as_secs(),
    }
}

fn apply_failed(migration: &Migration, source: ProcessorError) -> Error {
    Error::Apply {
        version: migration.version,
        name: migration.name.clone(),
        source,
    }
}

/// Awaits a processor call, failing with [`Error::ProcessorTimeout`] after
/// `timeout`.
async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, ProcessorError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| timed_out(operation, timeout))?
        .map_err(Error::from)
}
