//! Project configuration (`.tfmigrate.json`).
//!
//! ```json
//! {
//!   "migration_dir": "tfmigrate",
//!   "history": {
//!     "storage": { "type": "local", "path": "tfmigrate/history.json" }
//!   }
//! }
//! ```
//!
//! Without a `history` block, plan and apply need an explicit migration file
//! and nothing is recorded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::history::StorageConfig;

/// Default configuration file name, looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = ".tfmigrate.json";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "TFMIGRATE_LOG";

fn default_migration_dir() -> PathBuf {
    PathBuf::from(".")
}

/// History settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfmigrateConfig {
    /// Directory holding migration files
    #[serde(default = "default_migration_dir")]
    pub migration_dir: PathBuf,

    #[serde(default)]
    pub history: Option<HistoryConfig>,
}

impl Default for TfmigrateConfig {
    fn default() -> Self {
        Self {
            migration_dir: default_migration_dir(),
            history: None,
        }
    }
}

impl TfmigrateConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration JSON in {:?}", path.as_ref()))?;
        config.validate()?;

        Ok(config)
    }

    /// Load `path`, falling back to defaults when it does not exist.
    ///
    /// An explicitly requested file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_file(default_path)
                } else {
                    tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration_dir.as_os_str().is_empty() {
            anyhow::bail!("migration_dir must not be empty");
        }
        if let Some(history) = &self.history {
            history.storage.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: TfmigrateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TfmigrateConfig::default());
        assert_eq!(config.migration_dir, PathBuf::from("."));
        assert!(config.history.is_none());
    }

    #[test]
    fn test_full_config() {
        let config: TfmigrateConfig = serde_json::from_str(
            r#"{
                "migration_dir": "tfmigrate",
                "history": {"storage": {"type": "local", "path": "tfmigrate/history.json"}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.migration_dir, PathBuf::from("tfmigrate"));
        assert_eq!(
            config.history.unwrap().storage,
            StorageConfig::Local {
                path: PathBuf::from("tfmigrate/history.json")
            }
        );
    }

    #[test]
    fn test_validation() {
        let config = TfmigrateConfig {
            migration_dir: PathBuf::new(),
            history: None,
        };
        assert!(config.validate().is_err());

        let config = TfmigrateConfig {
            history: Some(HistoryConfig {
                storage: StorageConfig::Local {
                    path: PathBuf::new(),
                },
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = TfmigrateConfig {
            migration_dir: PathBuf::from("migrations"),
            history: Some(HistoryConfig {
                storage: StorageConfig::Mock {
                    data: String::new(),
                    write_error: false,
                    read_error: false,
                },
            }),
        };

        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(TfmigrateConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let err = TfmigrateConfig::load_or_default(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(TfmigrateConfig::load_from_file(&path).is_err());
    }
}
