//! Package compilation.
//!
//! The builder stages unit definitions and SQL resources on disk and hands
//! them to a [`Compiler`] in a single [`CompileRequest`]. [`ArchiveCompiler`]
//! bundles them into the JSON package format.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::package::{
    EmbeddedResource, Package, Reference, RuntimeInfo, UnitAction, UnitDefinition,
    PACKAGE_FORMAT, RUNTIME_NAME, RUNTIME_VERSION,
};

/// Everything needed to produce one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRequest {
    /// Staged unit definition files.
    pub sources: Vec<PathBuf>,
    /// Staged SQL files to embed.
    pub resources: Vec<PathBuf>,
    /// Dependency references, including the runtime.
    pub references: Vec<Reference>,
    /// Where to write the package.
    pub output: PathBuf,
}

/// A rejected compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("compilation failed: {}", .diagnostics.join("; "))]
pub struct CompileError {
    /// One entry per problem found.
    pub diagnostics: Vec<String>,
}

impl CompileError {
    /// Creates an error with a single diagnostic.
    #[must_use]
    pub fn single(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![diagnostic.into()],
        }
    }
}

/// Turns staged units and resources into a loadable package.
pub trait Compiler: Send + Sync {
    /// Compiles `request`, writing the package to `request.output`.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] listing every diagnostic.
    fn compile(&self, request: &CompileRequest) -> Result<(), CompileError>;
}

/// Writes packages in the JSON archive format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCompiler;

impl ArchiveCompiler {
    /// Creates a new archive compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn read_units(sources: &[PathBuf], diagnostics: &mut Vec<String>) -> Vec<UnitDefinition> {
        let mut units = Vec::new();
        for path in sources {
            let parsed = fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<UnitDefinition>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(unit) => units.push(unit),
                Err(e) => diagnostics.push(format!("{}: invalid unit: {e}", path.display())),
            }
        }
        units
    }

    fn read_resources(
        resources: &[PathBuf],
        diagnostics: &mut Vec<String>,
    ) -> BTreeMap<String, EmbeddedResource> {
        let mut table = BTreeMap::new();
        for path in resources {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                diagnostics.push(format!("{}: resource name is not valid UTF-8", path.display()));
                continue;
            };
            match fs::read_to_string(path) {
                Ok(content) => {
                    if table
                        .insert(name.to_string(), EmbeddedResource::new(name, content))
                        .is_some()
                    {
                        diagnostics.push(format!("duplicate resource '{name}'"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => diagnostics.push(format!(
                    "{}: cannot embed: script is not valid UTF-8 text",
                    path.display()
                )),
                Err(e) => diagnostics.push(format!("{}: cannot embed: {e}", path.display())),
            }
        }
        table
    }

    fn check_units(
        units: &[UnitDefinition],
        resources: &BTreeMap<String, EmbeddedResource>,
        diagnostics: &mut Vec<String>,
    ) {
        let mut versions = HashSet::new();
        for unit in units {
            if !versions.insert(unit.version) {
                diagnostics.push(format!("duplicate unit version {}", unit.version));
            }
            for action in [&unit.up, &unit.down] {
                if let UnitAction::ExecuteEmbeddedScript(resource) = action {
                    if !resources.contains_key(resource) {
                        diagnostics.push(format!(
                            "unit {} references missing resource '{resource}'",
                            unit.id
                        ));
                    }
                }
            }
        }
    }

    fn write_package(package: &Package, output: &Path) -> Result<(), String> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let bytes = serde_json::to_vec_pretty(package).map_err(|e| e.to_string())?;
        fs::write(output, bytes).map_err(|e| e.to_string())
    }
}

impl Compiler for ArchiveCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<(), CompileError> {
        let mut diagnostics = Vec::new();

        if !request.references.iter().any(Reference::is_compatible_runtime) {
            diagnostics.push(format!(
                "missing reference {RUNTIME_NAME}@{RUNTIME_VERSION}"
            ));
        }

        let mut units = Self::read_units(&request.sources, &mut diagnostics);
        let resources = Self::read_resources(&request.resources, &mut diagnostics);
        Self::check_units(&units, &resources, &mut diagnostics);

        if !diagnostics.is_empty() {
            return Err(CompileError { diagnostics });
        }

        units.sort_by_key(|u| u.version);
        let package = Package {
            format: PACKAGE_FORMAT.to_string(),
            runtime: RuntimeInfo {
                name: RUNTIME_NAME.to_string(),
                version: RUNTIME_VERSION,
            },
            references: request.references.clone(),
            built_at: Utc::now(),
            units,
            resources: resources.into_values().collect(),
        };

        debug!(
            units = package.units.len(),
            resources = package.resources.len(),
            "Writing package"
        );
        Self::write_package(&package, &request.output).map_err(|e| {
            CompileError::single(format!("{}: cannot write package: {e}", request.output.display()))
        })?;

        info!(output = %request.output.display(), units = package.units.len(), "Package compiled");
        Ok(())
    }
}
