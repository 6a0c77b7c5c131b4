//! The applied-migration ledger and its blob encoding.
//!
//! Stored as pretty-printed JSON so operators can inspect it:
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": {
//!     "20201012010101_foo.json": {
//!       "type": "state",
//!       "name": "foo",
//!       "applied_at": "2020-10-13T01:02:03Z"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::storage::Storage;
use crate::error::{MigrateError, Result};

/// Format version written into every history blob
pub const HISTORY_VERSION: u32 = 1;

/// Metadata of one applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct HistoryFile<R> {
    version: u32,
    records: R,
}

/// Applied migrations keyed by migration identifier (the file name)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    records: BTreeMap<String, Record>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any existing record for `id`.
    pub fn add(&mut self, id: impl Into<String>, record: Record) -> Option<Record> {
        self.records.insert(id.into(), record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Remove the record for `id`; absent ids are ignored.
    pub fn delete(&mut self, id: &str) -> Option<Record> {
        self.records.remove(id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by id
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&HistoryFile {
            version: HISTORY_VERSION,
            records: &self.records,
        })?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode a blob; an empty blob is an empty history.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let file: HistoryFile<BTreeMap<String, Record>> = serde_json::from_slice(bytes)
            .map_err(|e| MigrateError::HistoryFormat(e.to_string()))?;
        if file.version != HISTORY_VERSION {
            return Err(MigrateError::HistoryFormat(format!(
                "unsupported history version {} (expected {})",
                file.version, HISTORY_VERSION
            )));
        }

        Ok(Self {
            records: file.records,
        })
    }

    pub fn load<S: Storage + ?Sized>(storage: &S) -> Result<Self> {
        Self::decode(&storage.read()?)
    }

    pub fn save<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<()> {
        storage.write(&self.encode()?)
    }
}
