//! Runnable migrations.
//!
//! A [`Migration`] is what the loader hands to the runner: a version, a
//! display name and the up/down actions bound to the package's embedded SQL.

use crate::version::Version;

/// What a migration does in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationAction {
    /// Execute an embedded SQL script.
    ExecuteScript {
        /// Name of the embedded resource.
        resource: String,
        /// The script text.
        sql: String,
    },
    /// Do nothing.
    Noop,
}

impl MigrationAction {
    /// Returns the SQL to execute, if any.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::ExecuteScript { sql, .. } => Some(sql),
            Self::Noop => None,
        }
    }

    /// Short human-readable description for announcements.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ExecuteScript { resource, .. } => {
                format!("execute embedded script {resource}")
            }
            Self::Noop => "no-op".to_string(),
        }
    }
}

/// A migration ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Ordering key and ledger identity.
    pub version: Version,
    /// Display name (the script's filename stem).
    pub name: String,
    /// Forward action.
    pub up: MigrationAction,
    /// Reverse action. Always a placeholder; rollback is not implemented.
    pub down: MigrationAction,
}

impl Migration {
    /// Creates a migration whose up action runs `sql` from `resource` and
    /// whose down action is a no-op.
    #[must_use]
    pub fn from_script(
        version: Version,
        name: impl Into<String>,
        resource: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up: MigrationAction::ExecuteScript {
                resource: resource.into(),
                sql: sql.into(),
            },
            down: MigrationAction::Noop,
        }
    }

    /// Returns the `version: name` label used in logs and announcements.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}: {}", self.version, self.name)
    }
}
