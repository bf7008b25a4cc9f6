//! Script discovery.
//!
//! Scans a directory for `<YYYYMMDDHHmm>.sql` files and turns each into a
//! [`ScriptFile`]. Names are validated eagerly: a malformed or duplicated
//! version fails the whole scan before anything is written.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::version::Version;

/// Extension of migration scripts.
pub const SCRIPT_EXTENSION: &str = "sql";

/// A discovered migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    /// Version parsed from the filename stem.
    pub version: Version,
    /// Filename stem.
    pub name: String,
    /// Path to the SQL file.
    pub path: PathBuf,
}

impl ScriptFile {
    /// Name of the embedded resource this script becomes in a package.
    #[must_use]
    pub fn resource_name(&self) -> String {
        format!("{}.{SCRIPT_EXTENSION}", self.name)
    }
}

fn is_script(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(SCRIPT_EXTENSION))
}

/// Discovers every migration script directly inside `dir`.
///
/// The result is sorted by version. Callers must not rely on that for
/// correctness; the runner orders migrations itself.
///
/// # Errors
///
/// - [`Error::DirectoryNotFound`] if `dir` is not an existing directory.
/// - [`Error::InvalidVersionFormat`] if a stem is not a `YYYYMMDDHHmm` token.
/// - [`Error::DuplicateVersion`] if two files share a version.
/// - [`Error::Io`] if the directory cannot be read.
pub fn discover_scripts(dir: &Path) -> Result<Vec<ScriptFile>> {
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut scripts = Vec::new();
    let mut seen: HashMap<Version, PathBuf> = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_script(&path) {
            continue;
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidVersionFormat {
                path: path.clone(),
                reason: "filename is not valid UTF-8".to_string(),
            })?
            .to_string();

        let version: Version = name.parse().map_err(|e| Error::InvalidVersionFormat {
            path: path.clone(),
            reason: format!("{e}"),
        })?;

        if let Some(first) = seen.insert(version, path.clone()) {
            return Err(Error::DuplicateVersion {
                version,
                first: first.display().to_string(),
                second: path.display().to_string(),
            });
        }

        debug!(version = %version, path = %path.display(), "Discovered script");
        scripts.push(ScriptFile {
            version,
            name,
            path,
        });
    }

    scripts.sort_by_key(|s| s.version);
    debug!(count = scripts.len(), dir = %dir.display(), "Discovered scripts");
    Ok(scripts)
}
