//! Migration history: which migration files have been applied.
//!
//! - [`record`]: the in-memory [`History`] ledger and its blob encoding
//! - [`storage`]: the [`Storage`] port and its local and in-memory backends
//! - [`controller`]: [`HistoryController`], which runs unapplied migrations
//!   and records them

pub mod controller;
pub mod record;
pub mod storage;

pub use controller::{HistoryController, MIGRATION_FILE_EXTENSION, list_migration_files};
pub use record::{HISTORY_VERSION, History, Record};
pub use storage::{LocalStorage, MockStorage, Storage, StorageConfig};
