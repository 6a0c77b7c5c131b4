//! State migrations: actions, the migration pipeline and migration files.

pub mod action;
pub mod file;
pub mod migrator;
pub mod stage;

pub use action::{ActionKind, StateAction};
pub use file::{MigrationFile, MigrationKind};
pub use migrator::{BackendOverride, MigratorOptions, OVERRIDE_FILE_NAME, StateMigrator};
pub use stage::{MigrationContext, MigrationStage, StageTransitionError};
