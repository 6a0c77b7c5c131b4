//! Runs migration files in order and records the ones that were applied.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use super::record::{History, Record};
use super::storage::Storage;
use crate::error::{MigrateError, Result};
use crate::tfmigrate::{MigrationFile, MigratorOptions};

/// Extension of migration files
pub const MIGRATION_FILE_EXTENSION: &str = "json";

/// List migration file names in `dir`, sorted by name.
///
/// Hidden files and `exclude` (the local history file, which may share the
/// directory) are skipped.
pub fn list_migration_files(dir: &Path, exclude: Option<&Path>) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        MigrateError::config(format!("failed to read migration_dir {:?}: {}", dir, e))
    })?;
    let exclude = exclude.and_then(|p| fs::canonicalize(p).ok());

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_FILE_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if exclude.is_some() && fs::canonicalize(&path).ok() == exclude {
            continue;
        }
        files.push(name.to_string());
    }

    files.sort();
    Ok(files)
}

/// Identifier of a migration given either as a bare file name or a path
fn migration_id(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Selects unapplied migrations, runs them and keeps the history in sync.
#[derive(Debug)]
pub struct HistoryController<S> {
    migration_dir: PathBuf,
    migrations: Vec<String>,
    history: History,
    storage: S,
}

impl<S: Storage> HistoryController<S> {
    /// Scan `migration_dir` and load the history from `storage`.
    pub fn load(migration_dir: impl Into<PathBuf>, storage: S) -> Result<Self> {
        let migration_dir = migration_dir.into();
        let migrations = list_migration_files(&migration_dir, storage.local_path())?;
        let history = History::load(&storage)?;
        info!(
            dir = %migration_dir.display(),
            files = migrations.len(),
            applied = history.len(),
            "loaded migration history"
        );

        Ok(Self {
            migration_dir,
            migrations,
            history,
            storage,
        })
    }

    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    /// All migration file names, sorted
    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn already_applied(&self, filename: &str) -> bool {
        self.history.contains(&migration_id(filename))
    }

    /// Migration file names not present in history, in order
    pub fn unapplied_migrations(&self) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|m| !self.history.contains(m))
            .cloned()
            .collect()
    }

    fn targets(&self, filename: Option<&str>) -> Vec<String> {
        match filename {
            Some(filename) => {
                let id = migration_id(filename);
                if self.history.contains(&id) {
                    info!(file = %id, "skipping migration: already applied");
                    Vec::new()
                } else {
                    vec![id]
                }
            }
            None => self.unapplied_migrations(),
        }
    }

    fn load_migration(&self, id: &str) -> Result<MigrationFile> {
        MigrationFile::load_from_file(self.migration_dir.join(id))
    }

    /// Plan `filename`, or every unapplied migration, with the real tool.
    pub fn plan(&self, filename: Option<&str>, options: &MigratorOptions) -> Result<Vec<String>> {
        self.plan_with(filename, |file| file.migrator(options)?.plan())
    }

    /// Plan with a caller-supplied runner. Returns the planned file names.
    pub fn plan_with<F>(&self, filename: Option<&str>, mut run: F) -> Result<Vec<String>>
    where
        F: FnMut(&MigrationFile) -> Result<()>,
    {
        let targets = self.targets(filename);
        for id in &targets {
            let file = self.load_migration(id)?;
            info!(file = %id, "planning migration");
            run(&file)?;
        }
        Ok(targets)
    }

    /// Apply `filename`, or every unapplied migration, with the real tool.
    pub fn apply(
        &mut self,
        filename: Option<&str>,
        options: &MigratorOptions,
    ) -> Result<Vec<String>> {
        self.apply_with(filename, |file| file.migrator(options)?.apply())
    }

    /// Apply with a caller-supplied runner, recording each success before the next file.
    ///
    /// Stops at the first failure; files applied before it stay recorded.
    pub fn apply_with<F>(&mut self, filename: Option<&str>, mut run: F) -> Result<Vec<String>>
    where
        F: FnMut(&MigrationFile) -> Result<()>,
    {
        let targets = self.targets(filename);
        for id in &targets {
            let file = self.load_migration(id)?;
            info!(file = %id, "applying migration");
            run(&file)?;
            self.record_applied(id, file.record(Utc::now()))?;
            info!(file = %id, "migration recorded in history");
        }
        Ok(targets)
    }

    fn persist(&mut self, staged: History) -> Result<()> {
        staged.save(&mut self.storage)?;
        self.history = staged;
        Ok(())
    }

    fn record_applied(&mut self, id: &str, record: Record) -> Result<()> {
        let mut staged = self.history.clone();
        staged.add(id, record);
        self.persist(staged)
    }

    /// Forget every applied migration.
    pub fn clear_history(&mut self) -> Result<()> {
        info!(records = self.history.len(), "clearing migration history");
        self.persist(History::new())
    }

    /// Forget one applied migration. Returns false if it was not recorded.
    pub fn delete_record(&mut self, id: &str) -> Result<bool> {
        let id = migration_id(id);
        if !self.history.contains(&id) {
            debug!(file = %id, "no history record to delete");
            return Ok(false);
        }

        let mut staged = self.history.clone();
        staged.delete(&id);
        self.persist(staged)?;
        info!(file = %id, "deleted history record");
        Ok(true)
    }
}
