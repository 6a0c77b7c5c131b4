//! Opaque terraform state snapshots.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;

/// A serialized state snapshot.
///
/// The bytes are never interpreted; they only travel between the tool and
/// migration actions. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct State {
    bytes: Arc<[u8]>,
}

impl State {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read a state back from a file the tool rewrote
    pub fn read_from(path: &Path) -> io::Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    /// Write the state to a temporary file that is deleted on drop.
    pub fn write_temp(&self) -> io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("tfmigrate-")
            .suffix(".tfstate")
            .tempfile()?;
        file.write_all(&self.bytes)?;
        file.flush()?;
        Ok(file)
    }
}

// State may hold secrets; never print its contents.
impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({} bytes)", self.bytes.len())
    }
}

impl From<Vec<u8>> for State {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}
