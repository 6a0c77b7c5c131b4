//! State migration pipeline.
//!
//! A run walks the stages of [`MigrationStage`]: check the tool, initialize,
//! pull the current state, thread it through every action, switch the working
//! directory to a throwaway local backend and plan against the candidate.
//! `apply` additionally pushes the candidate once the original backend has
//! been restored.
//!
//! The local backend override is held by a [`BackendOverride`] guard. It is
//! removed and the directory re-initialized on every exit path, including
//! errors, panics and operator interrupts.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use strum::Display;
use tracing::{debug, error, info, warn};

use super::action::StateAction;
use super::stage::{MigrationContext, MigrationStage};
use crate::error::{MigrateError, Result};
use crate::process_guard::{CancelToken, OverrideRegistry};
use crate::tfexec::{
    DEFAULT_EXEC_PATH, EXEC_PATH_ENV, InitArgs, PlanResult, ProcessExecutor, Terraform,
    TerraformCli,
};

/// Name of the backend override file written into the working directory
pub const OVERRIDE_FILE_NAME: &str = "_tfmigrate_override.tf";

const OVERRIDE_CONTENTS: &str = "terraform {\n  backend \"local\" {\n  }\n}\n";

/// Scoped ownership of the local backend override.
///
/// While alive, the working directory is initialized against a local backend
/// so that `-state` flags are honoured. Dropping the guard (or calling
/// [`BackendOverride::release`]) deletes the override file and re-initializes
/// against the configured backend.
pub struct BackendOverride<'a, T: Terraform + ?Sized> {
    tf: &'a T,
    path: PathBuf,
    active: bool,
}

impl<'a, T: Terraform + ?Sized> BackendOverride<'a, T> {
    /// Write the override file and re-initialize against it.
    ///
    /// An existing file with the same name is never overwritten.
    pub fn install(tf: &'a T) -> Result<Self> {
        let path = tf.dir().join(OVERRIDE_FILE_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    MigrateError::BackendOverride(format!(
                        "{} already exists; remove it before running a migration",
                        path.display()
                    ))
                } else {
                    MigrateError::BackendOverride(format!(
                        "failed to create {}: {}",
                        path.display(),
                        e
                    ))
                }
            })?;

        // From here on the file is ours; the guard cleans it up on failure.
        let guard = Self {
            tf,
            path,
            active: true,
        };
        if let Ok(mut overrides) = OverrideRegistry::global().lock() {
            overrides.register(&guard.path);
        }

        file.write_all(OVERRIDE_CONTENTS.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                MigrateError::BackendOverride(format!(
                    "failed to write {}: {}",
                    guard.path.display(),
                    e
                ))
            })?;
        drop(file);
        debug!(path = %guard.path.display(), "backend override written");

        tf.init(&InitArgs::reconfigure()).map_err(|e| {
            MigrateError::from_tool("init (local backend)", e, MigrateError::InitializationFailed)
        })?;

        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the override and restore the configured backend, reporting failures.
    pub fn release(mut self) -> Result<()> {
        self.active = false;
        self.restore()
    }

    /// Remove the file, then re-initialize even if the removal failed.
    ///
    /// The first failure is returned.
    fn restore(&self) -> Result<()> {
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "backend override removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrateError::BackendOverride(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        };
        if removed.is_ok() {
            if let Ok(mut overrides) = OverrideRegistry::global().lock() {
                overrides.unregister(&self.path);
            }
        }

        let restored = self.tf.restore_backend().map_err(|e| {
            MigrateError::from_tool("init (restore backend)", e, MigrateError::InitializationFailed)
        });
        removed.and(restored)
    }
}

impl<T: Terraform + ?Sized> Drop for BackendOverride<'_, T> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.restore() {
            error!(
                path = %self.path.display(),
                "failed to roll back backend override: {}", err
            );
        }
    }
}

/// Options shared by every migrator of a run
#[derive(Debug, Clone, Default)]
pub struct MigratorOptions {
    /// Tool executable; falls back to `TFMIGRATE_EXEC_PATH`, then `terraform`
    pub exec_path: Option<String>,
    /// Upper bound for each tool invocation
    pub timeout: Option<Duration>,
    /// Interrupts the in-flight tool invocation when cancelled
    pub cancel: CancelToken,
}

impl MigratorOptions {
    pub fn resolved_exec_path(&self) -> String {
        self.exec_path
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| std::env::var(EXEC_PATH_ENV).ok().filter(|p| !p.is_empty()))
            .unwrap_or_else(|| DEFAULT_EXEC_PATH.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
enum Mode {
    Plan,
    Apply,
}

/// Applies a list of state actions to the state of one working directory.
#[derive(Debug)]
pub struct StateMigrator<T> {
    tf: T,
    actions: Vec<StateAction>,
    context: MigrationContext,
}

impl StateMigrator<TerraformCli<ProcessExecutor>> {
    /// Build a migrator that runs the real tool in `dir`.
    pub fn new(dir: impl Into<PathBuf>, actions: Vec<StateAction>, options: &MigratorOptions) -> Self {
        let executor = ProcessExecutor::new(dir)
            .with_env("TF_IN_AUTOMATION", "1")
            .with_timeout(options.timeout)
            .with_cancel_token(options.cancel.clone());
        let tf = TerraformCli::new(executor).with_exec_path(options.resolved_exec_path());
        Self::with_terraform(tf, actions)
    }
}

impl<T: Terraform> StateMigrator<T> {
    pub fn with_terraform(tf: T, actions: Vec<StateAction>) -> Self {
        Self {
            tf,
            actions,
            context: MigrationContext::new(),
        }
    }

    pub fn terraform(&self) -> &T {
        &self.tf
    }

    pub fn actions(&self) -> &[StateAction] {
        &self.actions
    }

    /// Progress of the most recent run
    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    /// Compute the migrated state and verify it plans clean, without committing.
    pub fn plan(&mut self) -> Result<()> {
        self.run(Mode::Plan)
    }

    /// Like [`plan`](Self::plan), then push the migrated state.
    pub fn apply(&mut self) -> Result<()> {
        self.run(Mode::Apply)
    }

    fn run(&mut self, mode: Mode) -> Result<()> {
        self.context.reset();
        let result = run_pipeline(&self.tf, &self.actions, &mut self.context, mode);

        if let Err(err) = &result {
            warn!(
                stage = %self.context.current_stage(),
                "{} failed: {}", mode, err
            );
            if !self.context.current_stage().is_terminal() {
                if let Err(e) = self.context.fail() {
                    debug!("could not mark migration as failed: {}", e);
                }
            }
        }
        result
    }
}

fn run_pipeline<T: Terraform + ?Sized>(
    tf: &T,
    actions: &[StateAction],
    ctx: &mut MigrationContext,
    mode: Mode,
) -> Result<()> {
    info!(
        dir = %tf.dir().display(),
        actions = actions.len(),
        "starting state migration {}", mode
    );

    let version = tf
        .version()
        .map_err(|e| MigrateError::from_tool("version", e, MigrateError::ToolUnavailable))?;
    ctx.transition_to(MigrationStage::VersionChecked)?;
    info!(%version, "terraform version");

    tf.init(&InitArgs::default())
        .map_err(|e| MigrateError::from_tool("init", e, MigrateError::InitializationFailed))?;
    ctx.transition_to(MigrationStage::Initialized)?;

    let mut state = tf
        .state_pull()
        .map_err(|e| MigrateError::from_tool("state pull", e, MigrateError::StateFetchFailed))?;
    ctx.transition_to(MigrationStage::StatePulled)?;
    debug!(bytes = state.len(), "pulled current state");

    for (index, action) in actions.iter().enumerate() {
        info!(index, kind = %action.kind(), "applying {}", action);
        state = action.apply(tf, &state).map_err(|e| {
            MigrateError::from_tool(&format!("action #{}", index), e, |reason| {
                MigrateError::ActionFailed {
                    index,
                    action: action.to_string(),
                    reason,
                }
            })
        })?;
    }
    ctx.transition_to(MigrationStage::ActionsApplied)?;

    let guard = BackendOverride::install(tf)?;
    ctx.transition_to(MigrationStage::BackendOverridden)?;
    debug_assert!(ctx.current_stage().holds_override());

    let plan = tf
        .plan(&state)
        .map_err(|e| MigrateError::from_tool("plan", e, MigrateError::DiffCheckFailed))?;
    if let PlanResult::DiffDetected { output } = plan {
        return Err(MigrateError::UnexpectedDiff(output));
    }
    ctx.transition_to(MigrationStage::DiffVerified)?;
    info!("plan against the migrated state has no changes");

    // The push must go to the configured backend, not the local override.
    debug_assert!(ctx.current_stage().holds_override());
    guard.release()?;

    match mode {
        Mode::Plan => {
            ctx.finish_dry_run()?;
        }
        Mode::Apply => {
            tf.state_push(&state)
                .map_err(|e| MigrateError::from_tool("state push", e, MigrateError::PushFailed))?;
            ctx.transition_to(MigrationStage::Committed)?;
            info!("pushed migrated state");
        }
    }

    Ok(())
}
