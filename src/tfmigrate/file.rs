//! Migration file loading.
//!
//! A migration file is a JSON document describing one state migration:
//!
//! ```json
//! {
//!   "type": "state",
//!   "name": "rename_foo",
//!   "dir": "envs/prod",
//!   "actions": ["mv null_resource.foo null_resource.foo2"]
//! }
//! ```
//!
//! Its file name (e.g. `20201012010101_foo.json`) identifies it in history.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::action::StateAction;
use super::migrator::{MigratorOptions, StateMigrator};
use crate::error::{MigrateError, Result};
use crate::history::Record;
use crate::tfexec::{ProcessExecutor, TerraformCli};

/// Kinds of migration a file can describe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MigrationKind {
    State,
}

fn default_dir() -> String {
    ".".to_string()
}

/// A parsed migration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationFile {
    #[serde(rename = "type")]
    pub kind: MigrationKind,
    #[serde(default)]
    pub name: String,
    /// Working directory, relative to the current directory
    #[serde(default = "default_dir")]
    pub dir: String,
    pub actions: Vec<String>,
}

impl MigrationFile {
    /// Load and validate a migration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::invalid_migration(format!("failed to read {:?}: {}", path, e))
        })?;
        Self::parse(&content).map_err(|e| match e {
            MigrateError::InvalidMigration(msg) => {
                MigrateError::InvalidMigration(format!("{:?}: {}", path, msg))
            }
            MigrateError::InvalidAction(msg) => {
                MigrateError::InvalidAction(format!("{:?}: {}", path, msg))
            }
            other => other,
        })
    }

    /// Parse and validate migration file contents
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(content)
            .map_err(|e| MigrateError::invalid_migration(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(MigrateError::invalid_migration("dir must not be empty"));
        }
        if self.actions.is_empty() {
            return Err(MigrateError::invalid_migration(
                "a migration needs at least one action",
            ));
        }
        self.state_actions().map(|_| ())
    }

    pub fn state_actions(&self) -> Result<Vec<StateAction>> {
        StateAction::parse_all(&self.actions)
    }

    pub fn working_dir(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    /// Build a migrator running the real tool in this file's directory
    pub fn migrator(
        &self,
        options: &MigratorOptions,
    ) -> Result<StateMigrator<TerraformCli<ProcessExecutor>>> {
        Ok(StateMigrator::new(
            self.working_dir(),
            self.state_actions()?,
            options,
        ))
    }

    /// History record for a successful apply of this file
    pub fn record(&self, applied_at: DateTime<Utc>) -> Record {
        Record {
            kind: self.kind.to_string(),
            name: self.name.clone(),
            applied_at,
        }
    }
}
