//! Storage port for the history blob.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{MigrateError, Result};

/// Persists the serialized history.
///
/// Failures are reported as [`MigrateError::StorageReadFailed`] and
/// [`MigrateError::StorageWriteFailed`]; nothing is retried or cached.
pub trait Storage {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read the stored blob; a storage that was never written returns an empty blob.
    fn read(&self) -> Result<Vec<u8>>;

    /// Path of the backing file, if this storage lives on the local filesystem
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&self) -> Result<Vec<u8>> {
        (**self).read()
    }

    fn local_path(&self) -> Option<&Path> {
        (**self).local_path()
    }
}

/// History stored in a file on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for LocalStorage {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let fail = |e: std::io::Error| {
            MigrateError::StorageWriteFailed(format!("{}: {}", self.path.display(), e))
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(fail)?;

        // Write beside the target and rename, so a crash never leaves a torn file.
        let mut file = NamedTempFile::new_in(parent).map_err(fail)?;
        file.write_all(bytes).map_err(fail)?;
        file.as_file().sync_all().map_err(fail)?;
        file.persist(&self.path).map_err(|e| fail(e.error))?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(MigrateError::StorageReadFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// In-memory storage with switchable failures, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    data: String,
    write_error: bool,
    read_error: bool,
}

impl MockStorage {
    pub fn new(data: impl Into<String>, write_error: bool, read_error: bool) -> Self {
        Self {
            data: data.into(),
            write_error,
            read_error,
        }
    }

    /// Raw stored blob
    pub fn data(&self) -> &str {
        &self.data
    }
}

impl Storage for MockStorage {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.write_error {
            return Err(MigrateError::StorageWriteFailed(format!(
                "failed to write mock storage: writeError = {}",
                self.write_error
            )));
        }
        self.data = String::from_utf8_lossy(bytes).into_owned();
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        if self.read_error {
            return Err(MigrateError::StorageReadFailed(format!(
                "failed to read mock storage: readError = {}",
                self.read_error
            )));
        }
        Ok(self.data.as_bytes().to_vec())
    }
}

/// Storage backend selected in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: PathBuf,
    },
    Mock {
        #[serde(default)]
        data: String,
        #[serde(default)]
        write_error: bool,
        #[serde(default)]
        read_error: bool,
    },
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Local { path } if path.as_os_str().is_empty() => {
                Err(MigrateError::config("history.storage.path must not be empty"))
            }
            _ => Ok(()),
        }
    }

    pub fn new_storage(&self) -> Box<dyn Storage> {
        match self {
            Self::Local { path } => Box::new(LocalStorage::new(path.clone())),
            Self::Mock {
                data,
                write_error,
                read_error,
            } => Box::new(MockStorage::new(data.clone(), *write_error, *read_error)),
        }
    }
}
