//! tfmigrate Library
//!
//! Applies declarative state migrations (move, remove, import) to a terraform
//! working directory, verifies with a plan that the migrated state matches
//! real infrastructure, and keeps a history of applied migrations.

pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod process_guard;
pub mod tfexec;
pub mod tfmigrate;

// Re-export main types for convenience
pub use config::{HistoryConfig, TfmigrateConfig};
pub use error::{MigrateError, Result};
pub use history::{History, HistoryController, LocalStorage, MockStorage, Record, Storage, StorageConfig};
pub use process_guard::{
    CancelToken, ChildRegistry, CommandProcessGroup, OverrideRegistry, ProcessGuard,
};
pub use tfexec::{
    Executor, MockCommand, MockExecutor, PlanResult, ProcessExecutor, State, Terraform,
    TerraformCli, ToolError,
};
pub use tfmigrate::{
    MigrationContext, MigrationFile, MigrationStage, MigratorOptions, StateAction, StateMigrator,
};
