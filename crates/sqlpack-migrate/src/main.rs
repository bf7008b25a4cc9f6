//! sqlpack-migrate CLI
//!
//! Builds migration packages from a directory of timestamped SQL scripts and
//! applies them to a database.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sqlpack_core::prelude::*;
use sqlpack_sqlite::SqliteProcessor;

use crate::config::{resolve_references, Engine, FileConfig, Overrides, Settings};

/// Package timestamped SQL scripts and apply them to a database.
#[derive(Parser)]
#[command(name = "sqlpack-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, env = "SQLPACK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package from a directory of `<YYYYMMDDHHmm>.sql` scripts.
    GeneratePackage {
        /// Directory holding the scripts. Scripts must be UTF-8 text.
        #[arg(short, long)]
        script_directory: PathBuf,

        /// Package file to write.
        #[arg(short, long)]
        output: PathBuf,

        /// Reference to compile against, as `name@version` (repeatable).
        #[arg(short, long = "reference")]
        references: Vec<String>,

        /// Directory in which the staging directory is created.
        #[arg(long)]
        staging_root: Option<PathBuf>,
    },

    /// Apply every pending migration in a package.
    ExecutePackage {
        /// Package file to apply.
        #[arg(short, long)]
        input: PathBuf,

        /// Database connection string.
        #[arg(short, long, env = "DATABASE_URL")]
        connection: String,

        /// Announce the migrations without executing or recording them.
        #[arg(long, overrides_with = "no_preview")]
        preview: bool,

        /// Execute for real even if the config file enables preview.
        #[arg(long, overrides_with = "preview")]
        no_preview: bool,

        /// Per-operation timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Transaction grouping: `per-migration` or `single`.
        #[arg(long)]
        transaction_mode: Option<TransactionMode>,

        /// Database engine.
        #[arg(long, value_enum)]
        engine: Option<Engine>,
    },

    /// Show which migrations in a package are applied.
    ShowMigrations {
        /// Package file to inspect.
        #[arg(short, long)]
        input: PathBuf,

        /// Database connection string.
        #[arg(short, long, env = "DATABASE_URL")]
        connection: String,

        /// Per-operation timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Database engine.
        #[arg(long, value_enum)]
        engine: Option<Engine>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging. Diagnostics go to stderr so stdout carries only output.
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = cli
        .config
        .as_deref()
        .map(FileConfig::from_file)
        .transpose()?
        .unwrap_or_default();

    match cli.command {
        Commands::GeneratePackage {
            script_directory,
            output,
            references,
            staging_root,
        } => {
            let references = resolve_references(&references, &file)?;
            let settings = Settings::resolve(
                file,
                Overrides {
                    staging_root,
                    ..Overrides::default()
                },
            )?;
            let staging =
                generate_package(&settings, references, script_directory, output).await?;
            println!("{}", staging.display());
        }

        Commands::ExecutePackage {
            input,
            connection,
            preview,
            no_preview,
            timeout,
            transaction_mode,
            engine,
        } => {
            let settings = Settings::resolve(
                file,
                Overrides {
                    timeout_secs: timeout,
                    transaction_mode,
                    preview: preview_flag(preview, no_preview),
                    engine,
                    ..Overrides::default()
                },
            )?;
            execute_package(&settings, &input, &connection).await?;
        }

        Commands::ShowMigrations {
            input,
            connection,
            timeout,
            engine,
        } => {
            let settings = Settings::resolve(
                file,
                Overrides {
                    timeout_secs: timeout,
                    engine,
                    ..Overrides::default()
                },
            )?;
            show_migrations(&settings, &input, &connection).await?;
        }
    }

    Ok(())
}

/// Builds the package on the blocking pool and returns the staging
/// directory.
async fn generate_package(
    settings: &Settings,
    references: Vec<Reference>,
    script_directory: PathBuf,
    output: PathBuf,
) -> anyhow::Result<PathBuf> {
    let builder = PackageBuilder::new(references).staging_root(&settings.staging_root);

    let outcome = tokio::task::spawn_blocking(move || {
        builder.build_from_dir(&script_directory, &output, &TracingAnnouncer)
    })
    .await
    .context("package build task panicked")??;

    info!(
        units = outcome.units,
        output = %outcome.output.display(),
        "Package written"
    );
    Ok(outcome.staging)
}

async fn execute_package(settings: &Settings, input: &Path, connection: &str) -> anyhow::Result<()> {
    let package = load_package(input)?;
    let mut processor = connect(settings.engine, connection, settings.runner.timeout).await?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current migration");
                cancel.cancel();
            }
        }
    });

    let result = MigrationRunner::new(processor.as_mut(), &ConsoleAnnouncer)
        .options(settings.runner)
        .cancellation(cancel)
        .migrate_up(package.migrations)
        .await;
    interrupt.abort();

    result?;
    Ok(())
}

async fn show_migrations(settings: &Settings, input: &Path, connection: &str) -> anyhow::Result<()> {
    let package = load_package(input)?;
    if package.migrations.is_empty() {
        info!("Package contains no migrations.");
        return Ok(());
    }

    let mut processor = connect(settings.engine, connection, settings.runner.timeout).await?;
    let statuses = MigrationRunner::new(processor.as_mut(), &SilentAnnouncer)
        .options(settings.runner)
        .status(package.migrations)
        .await?;

    println!("\nMigrations in {}:", input.display());
    println!("{:-<60}", "");
    for status in &statuses {
        println!(
            " [{}] {} ({})",
            if status.applied { "X" } else { " " },
            status.version,
            status.name
        );
    }
    println!();

    Ok(())
}

/// Collapses `--preview` / `--no-preview` into an override.
const fn preview_flag(preview: bool, no_preview: bool) -> Option<bool> {
    if preview {
        Some(true)
    } else if no_preview {
        Some(false)
    } else {
        None
    }
}

/// Opens a processor for `engine`, bounded by `timeout`.
async fn connect(
    engine: Engine,
    connection: &str,
    timeout: Duration,
) -> anyhow::Result<Box<dyn Processor>> {
    let processor: Box<dyn Processor> = match engine {
        Engine::Sqlite => {
            let processor = tokio::time::timeout(timeout, SqliteProcessor::connect(connection, timeout))
                .await
                .map_err(|_| Error::ProcessorTimeout {
                    operation: "connect",
                    seconds: timeout.as_secs(),
                })??;
            Box::new(processor)
        }
    };
    debug!(engine = processor.engine(), "Processor ready");
    Ok(processor)
}
