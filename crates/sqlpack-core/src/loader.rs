//! Package loader.
//!
//! Reads a compiled package and turns each unit into a runnable
//! [`Migration`], after checking the format, the runtime reference and every
//! resource checksum.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::migration::{Migration, MigrationAction};
use crate::package::{
    Package, Reference, UnitAction, PACKAGE_FORMAT, RUNTIME_NAME, RUNTIME_VERSION,
};

/// A package loaded into memory.
#[derive(Debug, Clone)]
pub struct LoadedPackage {
    /// Where the package was read from.
    pub path: PathBuf,
    /// References recorded at build time.
    pub references: Vec<Reference>,
    /// Migrations in package order.
    pub migrations: Vec<Migration>,
}

/// Loads the package at `path`.
///
/// # Errors
///
/// Returns [`Error::PackageLoad`] if the file is missing or unreadable, is not
/// a package, targets an incompatible runtime, or is internally inconsistent.
pub fn load_package(path: &Path) -> Result<LoadedPackage> {
    let invalid = |reason: String| Error::PackageLoad {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| invalid(e.to_string()))?;
    let package: Package =
        serde_json::from_slice(&bytes).map_err(|e| invalid(format!("not a package: {e}")))?;

    let migrations = package_migrations(&package).map_err(invalid)?;
    info!(
        path = %path.display(),
        migrations = migrations.len(),
        built_at = %package.built_at,
        "Package loaded"
    );

    Ok(LoadedPackage {
        path: path.to_path_buf(),
        references: package.references,
        migrations,
    })
}

/// Validates `package` and binds each unit to its embedded SQL.
fn package_migrations(package: &Package) -> std::result::Result<Vec<Migration>, String> {
    if package.format != PACKAGE_FORMAT {
        return Err(format!("unknown format '{}'", package.format));
    }
    if package.runtime.name != RUNTIME_NAME || package.runtime.version != RUNTIME_VERSION {
        return Err(format!(
            "built for {}@{}, this loader supports {RUNTIME_NAME}@{RUNTIME_VERSION}",
            package.runtime.name, package.runtime.version
        ));
    }

    if let Some(resource) = package.resources.iter().find(|r| !r.verify()) {
        return Err(format!("checksum mismatch for resource '{}'", resource.name));
    }

    let bind = |action: &UnitAction, unit_id: &str| match action {
        UnitAction::ExecuteEmbeddedScript(name) => package
            .resource(name)
            .map(|r| MigrationAction::ExecuteScript {
                resource: r.name.clone(),
                sql: r.content.clone(),
            })
            .ok_or_else(|| format!("unit {unit_id} references missing resource '{name}'")),
        UnitAction::None => Ok(MigrationAction::Noop),
    };

    let mut versions = HashSet::new();
    let mut migrations = Vec::with_capacity(package.units.len());
    for unit in &package.units {
        if !versions.insert(unit.version) {
            return Err(format!("duplicate unit version {}", unit.version));
        }
        debug!(unit = %unit.id, version = %unit.version, "Loading unit");
        migrations.push(Migration {
            version: unit.version,
            name: unit.name.clone(),
            up: bind(&unit.up, &unit.id)?,
            down: bind(&unit.down, &unit.id)?,
        });
    }
    Ok(migrations)
}
