//! Package format.
//!
//! A package is a JSON document holding a manifest of migration units and a
//! table of embedded SQL resources, plus the runtime reference it was built
//! against. The builder stages one [`UnitDefinition`] per script, the
//! compiler bundles them into a [`Package`], and the loader reads it back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::version::Version;

/// Format tag stored in every package.
pub const PACKAGE_FORMAT: &str = "sqlpack";

/// Name of the runtime a package depends on.
pub const RUNTIME_NAME: &str = "sqlpack-runtime";

/// Runtime version this crate builds and loads.
pub const RUNTIME_VERSION: u32 = 1;

/// Extension of staged unit definition files.
pub const UNIT_EXTENSION: &str = "unit.json";

/// A `name@version` dependency reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    /// Dependency name.
    pub name: String,
    /// Dependency version.
    pub version: u32,
}

impl Reference {
    /// The reference to the runtime this crate implements.
    #[must_use]
    pub fn runtime() -> Self {
        Self {
            name: RUNTIME_NAME.to_string(),
            version: RUNTIME_VERSION,
        }
    }

    /// Returns whether this reference names a runtime this crate can load.
    #[must_use]
    pub fn is_compatible_runtime(&self) -> bool {
        self.name == RUNTIME_NAME && self.version == RUNTIME_VERSION
    }
}

/// Why a string is not a `name@version` reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reference '{0}': expected name@version")]
pub struct InvalidReference(pub String);

impl FromStr for Reference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidReference(s.to_string());
        let (name, version) = s.trim().split_once('@').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid());
        }
        let version = version.trim().parse().map_err(|_| invalid())?;
        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl TryFrom<String> for Reference {
    type Error = InvalidReference;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// The action a unit performs in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    /// Execute the named embedded resource.
    ExecuteEmbeddedScript(String),
    /// Do nothing.
    None,
}

/// One generated migration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDefinition {
    /// Unit identity, `M<version>`.
    pub id: String,
    /// Version token.
    pub version: Version,
    /// Display name.
    pub name: String,
    /// Forward action.
    pub up: UnitAction,
    /// Reverse action.
    pub down: UnitAction,
}

impl UnitDefinition {
    /// Creates the unit for a script: up executes `resource`, down does nothing.
    #[must_use]
    pub fn for_script(version: Version, name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: unit_id(version),
            version,
            name: name.into(),
            up: UnitAction::ExecuteEmbeddedScript(resource.into()),
            down: UnitAction::None,
        }
    }

    /// File name of this unit inside a staging directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{UNIT_EXTENSION}", self.id)
    }
}

/// Returns the unit identity for a version.
#[must_use]
pub fn unit_id(version: Version) -> String {
    format!("M{version}")
}

/// An embedded SQL script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// Resource name, e.g. `201801010000.sql`.
    pub name: String,
    /// Hex SHA-256 of `content`.
    pub sha256: String,
    /// Script text.
    pub content: String,
}

impl EmbeddedResource {
    /// Creates a resource, computing its checksum.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            sha256: compute_checksum(&content),
            content,
        }
    }

    /// Returns whether the stored checksum matches the content.
    #[must_use]
    pub fn verify(&self) -> bool {
        compute_checksum(&self.content) == self.sha256
    }
}

/// Runtime reference recorded in a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Runtime name.
    pub name: String,
    /// Runtime version.
    pub version: u32,
}

/// A compiled migration package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Always [`PACKAGE_FORMAT`].
    pub format: String,
    /// Runtime the package was built for.
    pub runtime: RuntimeInfo,
    /// Every reference supplied at build time.
    pub references: Vec<Reference>,
    /// When the package was built.
    pub built_at: DateTime<Utc>,
    /// Migration units, ordered by version.
    pub units: Vec<UnitDefinition>,
    /// Embedded SQL resources.
    pub resources: Vec<EmbeddedResource>,
}

impl Package {
    /// Looks up an embedded resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&EmbeddedResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Computes the hex SHA-256 checksum of a string.
#[must_use]
pub fn compute_checksum(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}
