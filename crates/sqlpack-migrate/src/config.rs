//! Configuration.
//!
//! Settings come from three layers: built-in defaults, an optional TOML
//! file, and command-line flags (highest precedence). They are resolved and
//! validated once at startup into [`Settings`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use sqlpack_core::package::{InvalidReference, Reference};
use sqlpack_core::processor::DEFAULT_TIMEOUT;
use sqlpack_core::runner::{RunnerOptions, TransactionMode};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A reference is not `name@version`.
    #[error(transparent)]
    Reference(#[from] InvalidReference),

    /// No compatible runtime reference was configured.
    #[error("references must include sqlpack-runtime@1")]
    MissingRuntime,

    /// The timeout is zero.
    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

/// Database engine used to apply packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// SQLite through sqlx.
    #[default]
    Sqlite,
}

/// `[runner]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSection {
    /// Per-operation timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Transaction grouping.
    pub transaction_mode: Option<TransactionMode>,
    /// Preview without executing.
    pub preview: Option<bool>,
}

/// `[processor]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorSection {
    /// Engine to connect with.
    pub engine: Option<Engine>,
}

/// Contents of a `sqlpack.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// References compiled into packages.
    pub references: Option<Vec<String>>,
    /// Where staging directories are created.
    pub staging_root: Option<PathBuf>,
    /// Runner settings.
    pub runner: RunnerSection,
    /// Processor settings.
    pub processor: ProcessorSection,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML, unknown keys or
    /// unknown values.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub staging_root: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub transaction_mode: Option<TransactionMode>,
    /// `Some(true)` for `--preview`, `Some(false)` for `--no-preview`.
    pub preview: Option<bool>,
    pub engine: Option<Engine>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where staging directories are created.
    pub staging_root: PathBuf,
    /// Runner options.
    pub runner: RunnerOptions,
    /// Engine to connect with.
    pub engine: Engine,
}

impl Settings {
    /// Merges the file and command line over the defaults and validates the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTimeout`] if the resolved timeout is zero.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let timeout = match overrides.timeout_secs.or(file.runner.timeout_secs) {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            staging_root: overrides
                .staging_root
                .or(file.staging_root)
                .unwrap_or_else(std::env::temp_dir),
            runner: RunnerOptions {
                preview_only: overrides.preview.or(file.runner.preview).unwrap_or(false),
                timeout,
                transaction_mode: overrides
                    .transaction_mode
                    .or(file.runner.transaction_mode)
                    .unwrap_or_default(),
            },
            engine: overrides
                .engine
                .or(file.processor.engine)
                .unwrap_or_default(),
        })
    }
}

/// Resolves the references compiled into a package: the command line wins
/// over the file, and the runtime reference alone is the default.
///
/// # Errors
///
/// Returns [`ConfigError::Reference`] for an entry that is not
/// `name@version`, or [`ConfigError::MissingRuntime`] if no entry is a
/// compatible runtime.
pub fn resolve_references(
    cli: &[String],
    file: &FileConfig,
) -> Result<Vec<Reference>, ConfigError> {
    let raw = if cli.is_empty() {
        file.references.as_deref().unwrap_or_default()
    } else {
        cli
    };
    if raw.is_empty() {
        return Ok(vec![Reference::runtime()]);
    }

    let references = raw
        .iter()
        .map(String::as_str)
        .map(Reference::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if !references.iter().any(Reference::is_compatible_runtime) {
        return Err(ConfigError::MissingRuntime);
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"
references = ["sqlpack-runtime@1", "ledger@2"]
staging_root = "/var/tmp/sqlpack"

[runner]
timeout_secs = 30
transaction_mode = "single"
preview = true

[processor]
engine = "sqlite"
"#;

    #[test]
    fn test_defaults() {
        let file = FileConfig::default();
        let references = resolve_references(&[], &file).unwrap();
        let settings = Settings::resolve(file, Overrides::default()).unwrap();

        assert_eq!(references, vec![Reference::runtime()]);
        assert_eq!(settings.staging_root, std::env::temp_dir());
        assert_eq!(settings.runner, RunnerOptions::default());
        assert_eq!(settings.engine, Engine::Sqlite);
    }

    #[test]
    fn test_file_values() {
        let file = FileConfig::parse_toml(FULL).unwrap();
        let references = resolve_references(&[], &file).unwrap();
        let settings = Settings::resolve(file, Overrides::default()).unwrap();

        assert_eq!(references.len(), 2);
        assert_eq!(references[1].to_string(), "ledger@2");
        assert_eq!(settings.staging_root, PathBuf::from("/var/tmp/sqlpack"));
        assert_eq!(settings.runner.timeout, Duration::from_secs(30));
        assert_eq!(settings.runner.transaction_mode, TransactionMode::Single);
        assert!(settings.runner.preview_only);
    }

    #[test]
    fn test_command_line_wins() {
        let file = FileConfig::parse_toml(FULL).unwrap();
        let references = resolve_references(&["sqlpack-runtime@1".to_string()], &file).unwrap();
        let overrides = Overrides {
            staging_root: Some(PathBuf::from("/scratch")),
            timeout_secs: Some(5),
            transaction_mode: Some(TransactionMode::PerMigration),
            ..Overrides::default()
        };

        let settings = Settings::resolve(file, overrides).unwrap();

        assert_eq!(references, vec![Reference::runtime()]);
        assert_eq!(settings.staging_root, PathBuf::from("/scratch"));
        assert_eq!(settings.runner.timeout, Duration::from_secs(5));
        assert_eq!(
            settings.runner.transaction_mode,
            TransactionMode::PerMigration
        );
    }

    #[test]
    fn test_command_line_turns_preview_off() {
        let file = FileConfig::parse_toml("[runner]\npreview = true\n").unwrap();
        let overrides = Overrides {
            preview: Some(false),
            ..Overrides::default()
        };

        let settings = Settings::resolve(file.clone(), overrides).unwrap();
        assert!(!settings.runner.preview_only);

        let settings = Settings::resolve(file, Overrides::default()).unwrap();
        assert!(settings.runner.preview_only);
    }

    #[test]
    fn test_rejects_bad_references() {
        let file = FileConfig::default();

        let result = resolve_references(
            &["C:\\work\\packages\\FluentMigrator.dll".to_string()],
            &file,
        );
        assert!(matches!(result, Err(ConfigError::Reference(_))));

        let result = resolve_references(&["ledger@2".to_string()], &file);
        assert!(matches!(result, Err(ConfigError::MissingRuntime)));
    }

    #[test]
    fn test_bad_file_references_do_not_block_runs() {
        let file = FileConfig::parse_toml("references = [\"not a reference\"]\n").unwrap();

        assert!(matches!(
            resolve_references(&[], &file),
            Err(ConfigError::Reference(_))
        ));
        assert!(Settings::resolve(file, Overrides::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let overrides = Overrides {
            timeout_secs: Some(0),
            ..Overrides::default()
        };
        let result = Settings::resolve(FileConfig::default(), overrides);
        assert!(matches!(result, Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let result = FileConfig::parse_toml("[runner]\nretries = 3\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        let result = FileConfig::parse_toml("[processor]\nengine = \"oracle\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sqlpack.toml");
        std::fs::write(&path, FULL).unwrap();

        let file = FileConfig::from_file(&path).unwrap();
        assert_eq!(file.runner.timeout_secs, Some(30));

        let missing = FileConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
