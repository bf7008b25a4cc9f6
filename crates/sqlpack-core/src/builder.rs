//! Package builder.
//!
//! Stages one unit definition and one SQL resource per script in a private
//! directory, then compiles them into a package. The staging directory is
//! kept after the build, successful or not, so failed builds can be
//! inspected.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::announcer::Announcer;
use crate::compiler::{ArchiveCompiler, CompileRequest, Compiler};
use crate::discover::{discover_scripts, ScriptFile};
use crate::error::{BuildCause, Error, Result};
use crate::package::{Reference, UnitDefinition};

/// Prefix of staging directory names.
pub const STAGING_PREFIX: &str = "sqlpack-";

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Staging directory used by the build.
    pub staging: PathBuf,
    /// Package written.
    pub output: PathBuf,
    /// Number of migration units in the package.
    pub units: usize,
}

/// Builds migration packages.
#[derive(Debug, Clone)]
pub struct PackageBuilder<C: Compiler = ArchiveCompiler> {
    compiler: C,
    references: Vec<Reference>,
    staging_root: PathBuf,
}

impl PackageBuilder<ArchiveCompiler> {
    /// Creates a builder using the archive compiler.
    #[must_use]
    pub fn new(references: Vec<Reference>) -> Self {
        Self::with_compiler(ArchiveCompiler::new(), references)
    }
}

impl<C: Compiler> PackageBuilder<C> {
    /// Creates a builder with a custom compiler.
    #[must_use]
    pub fn with_compiler(compiler: C, references: Vec<Reference>) -> Self {
        Self {
            compiler,
            references,
            staging_root: env::temp_dir(),
        }
    }

    /// Sets the directory under which staging directories are created.
    #[must_use]
    pub fn staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    /// Returns the references passed to the compiler.
    #[must_use]
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Discovers the scripts in `dir` and builds a package from them.
    ///
    /// # Errors
    ///
    /// Returns discovery errors before anything is staged, otherwise the
    /// errors of [`PackageBuilder::build`].
    pub fn build_from_dir(
        &self,
        dir: &Path,
        output: &Path,
        announcer: &dyn Announcer,
    ) -> Result<BuildOutcome> {
        let scripts = discover_scripts(dir)?;
        self.build(&scripts, output, announcer)
    }

    /// Builds a package at `output` from `scripts`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PackageBuild`] if staging, copying, writing a unit or
    /// compiling fails. The staging directory is not removed.
    pub fn build(
        &self,
        scripts: &[ScriptFile],
        output: &Path,
        announcer: &dyn Announcer,
    ) -> Result<BuildOutcome> {
        let staging = self.allocate_staging()?;
        announcer.announce(&format!("Staging in {}", staging.display()));

        let fail = |cause: BuildCause| {
            warn!(staging = %staging.display(), "Package build failed, staging kept");
            Error::PackageBuild {
                staging: staging.clone(),
                cause,
            }
        };

        let mut request = CompileRequest {
            sources: Vec::with_capacity(scripts.len()),
            resources: Vec::with_capacity(scripts.len()),
            references: self.references.clone(),
            output: output.to_path_buf(),
        };

        for script in scripts {
            let resource = script.resource_name();
            let resource_path = staging.join(&resource);
            fs::copy(&script.path, &resource_path).map_err(|source| {
                fail(BuildCause::Copy {
                    path: script.path.clone(),
                    source,
                })
            })?;

            let unit = UnitDefinition::for_script(script.version, &script.name, &resource);
            let unit_path = staging.join(unit.file_name());
            write_unit(&unit, &unit_path).map_err(|reason| {
                fail(BuildCause::WriteUnit {
                    path: unit_path.clone(),
                    reason,
                })
            })?;

            debug!(version = %script.version, unit = %unit.id, "Staged script");
            announcer.announce(&format!("{} -> {}", script.path.display(), unit.id));

            request.resources.push(resource_path);
            request.sources.push(unit_path);
        }

        self.compiler
            .compile(&request)
            .map_err(|e| fail(BuildCause::Compile(e)))?;

        announcer.announce(&format!(
            "Compiled {} migration(s) into {}",
            scripts.len(),
            output.display()
        ));
        info!(
            output = %output.display(),
            staging = %staging.display(),
            units = scripts.len(),
            "Package built"
        );

        Ok(BuildOutcome {
            staging,
            output: output.to_path_buf(),
            units: scripts.len(),
        })
    }

    fn allocate_staging(&self) -> Result<PathBuf> {
        let staging = self
            .staging_root
            .join(format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()));

        fs::create_dir_all(&self.staging_root)
            .and_then(|()| fs::create_dir(&staging))
            .map_err(|e| Error::PackageBuild {
                staging: staging.clone(),
                cause: BuildCause::Stage(e),
            })?;

        debug!(staging = %staging.display(), "Allocated staging directory");
        Ok(staging)
    }
}

fn write_unit(unit: &UnitDefinition, path: &Path) -> std::result::Result<(), String> {
    let bytes = serde_json::to_vec_pretty(unit).map_err(|e| e.to_string())?;
    fs::write(path, bytes).map_err(|e| e.to_string())
}
