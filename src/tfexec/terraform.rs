//! Typed terraform client.
//!
//! [`Terraform`] is the capability interface the migrator and migration
//! actions are written against. [`TerraformCli`] implements it on top of any
//! [`Executor`], translating exit codes into typed outcomes.

use std::path::Path;

use super::args::{
    ImportArgs, InitArgs, PlanArgs, StateMvArgs, StatePullArgs, StatePushArgs, StateRmArgs,
    ToolArgs, VersionArgs,
};
use super::executor::{CommandOutput, Executor, ToolError};
use super::state::State;

/// Executable used when nothing else is configured (resolved through `PATH`)
pub const DEFAULT_EXEC_PATH: &str = "terraform";

/// Environment variable overriding the executable
pub const EXEC_PATH_ENV: &str = "TFMIGRATE_EXEC_PATH";

/// `plan -detailed-exitcode`: succeeded with an empty diff
const PLAN_EXIT_NO_DIFF: i32 = 0;

/// `plan -detailed-exitcode`: succeeded with a non-empty diff
const PLAN_EXIT_DIFF: i32 = 2;

/// Outcome of a diff-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult {
    /// The candidate state matches real infrastructure
    NoDiff,
    /// The candidate state would change infrastructure
    DiffDetected {
        /// Plan output describing the changes
        output: String,
    },
}

impl PlanResult {
    pub fn has_diff(&self) -> bool {
        matches!(self, Self::DiffDetected { .. })
    }
}

/// Operations the migration pipeline needs from terraform.
pub trait Terraform {
    /// Working directory the tool runs in
    fn dir(&self) -> &Path;

    /// Tool version, e.g. `1.0.0`
    fn version(&self) -> Result<String, ToolError>;

    /// Initialize the working directory
    fn init(&self, args: &InitArgs) -> Result<(), ToolError>;

    /// Re-initialize against the configured backend after an override.
    ///
    /// Must complete even when cancellation has been requested.
    fn restore_backend(&self) -> Result<(), ToolError>;

    /// Fetch the current remote state
    fn state_pull(&self) -> Result<State, ToolError>;

    /// Diff-check `state` against real infrastructure
    fn plan(&self, state: &State) -> Result<PlanResult, ToolError>;

    /// Replace the remote state with `state`
    fn state_push(&self, state: &State) -> Result<(), ToolError>;

    /// Move `source` to `destination` within `state`
    fn state_mv(&self, state: &State, source: &str, destination: &str) -> Result<State, ToolError>;

    /// Remove `addresses` from `state`
    fn state_rm(&self, state: &State, addresses: &[String]) -> Result<State, ToolError>;

    /// Import the existing object `id` as `address` into `state`
    fn import(&self, state: &State, address: &str, id: &str) -> Result<State, ToolError>;
}

/// Extract the version number from `terraform version` output.
///
/// The first line looks like `Terraform v1.0.0` (possibly followed by
/// `on linux_amd64` and provider lines).
pub fn parse_version(stdout: &str) -> Option<String> {
    let first_line = stdout.lines().next()?;
    first_line.split_whitespace().find_map(|token| {
        let version = token.strip_prefix('v')?;
        version
            .starts_with(|c: char| c.is_ascii_digit())
            .then(|| version.to_string())
    })
}

/// [`Terraform`] implementation that runs the real binary through an [`Executor`].
#[derive(Debug)]
pub struct TerraformCli<E> {
    executor: E,
    exec_path: String,
}

impl<E: Executor> TerraformCli<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            exec_path: DEFAULT_EXEC_PATH.to_string(),
        }
    }

    /// Invoke `exec_path` instead of `terraform`
    pub fn with_exec_path(mut self, exec_path: impl Into<String>) -> Self {
        self.exec_path = exec_path.into();
        self
    }

    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn command_line<A: ToolArgs>(&self, args: &A) -> Vec<String> {
        let mut argv = Vec::with_capacity(8);
        argv.push(self.exec_path.clone());
        argv.extend(args.subcommand().iter().map(|s| s.to_string()));
        argv.extend(args.to_cli_args());
        argv
    }

    /// Run a subcommand and require exit code 0.
    pub fn run<A: ToolArgs>(&self, args: &A) -> Result<CommandOutput, ToolError> {
        let argv = self.command_line(args);
        let output = self.executor.run(&argv)?;
        ensure_success(argv, output)
    }

    fn rewrite_state<A, F>(&self, state: &State, build: F) -> Result<State, ToolError>
    where
        A: ToolArgs,
        F: FnOnce(&Path) -> A,
    {
        let file = state.write_temp()?;
        self.run(&build(file.path()))?;
        Ok(State::read_from(file.path())?)
    }
}

fn ensure_success(args: Vec<String>, output: CommandOutput) -> Result<CommandOutput, ToolError> {
    if output.success() {
        Ok(output)
    } else {
        Err(ToolError::Exit {
            args,
            code: output.exit_code,
            stderr: output.stderr,
        })
    }
}

impl<E: Executor> Terraform for TerraformCli<E> {
    fn dir(&self) -> &Path {
        self.executor.dir()
    }

    fn version(&self) -> Result<String, ToolError> {
        let output = self.run(&VersionArgs)?;
        parse_version(&output.stdout).ok_or(ToolError::UnrecognizedVersion(output.stdout))
    }

    fn init(&self, args: &InitArgs) -> Result<(), ToolError> {
        self.run(args).map(|_| ())
    }

    fn restore_backend(&self) -> Result<(), ToolError> {
        let argv = self.command_line(&InitArgs::reconfigure());
        let output = self.executor.run_to_completion(&argv)?;
        ensure_success(argv, output).map(|_| ())
    }

    fn state_pull(&self) -> Result<State, ToolError> {
        let output = self.run(&StatePullArgs)?;
        Ok(State::new(output.stdout))
    }

    fn plan(&self, state: &State) -> Result<PlanResult, ToolError> {
        let file = state.write_temp()?;
        let argv = self.command_line(&PlanArgs {
            state_path: file.path().to_path_buf(),
        });
        let output = self.executor.run(&argv)?;

        match output.exit_code {
            Some(PLAN_EXIT_NO_DIFF) => Ok(PlanResult::NoDiff),
            Some(PLAN_EXIT_DIFF) => Ok(PlanResult::DiffDetected {
                output: output.stdout,
            }),
            code => Err(ToolError::Exit {
                args: argv,
                code,
                stderr: output.stderr,
            }),
        }
    }

    fn state_push(&self, state: &State) -> Result<(), ToolError> {
        let file = state.write_temp()?;
        self.run(&StatePushArgs {
            state_path: file.path().to_path_buf(),
        })
        .map(|_| ())
    }

    fn state_mv(&self, state: &State, source: &str, destination: &str) -> Result<State, ToolError> {
        self.rewrite_state(state, |path| StateMvArgs {
            state_path: path.to_path_buf(),
            source: source.to_string(),
            destination: destination.to_string(),
        })
    }

    fn state_rm(&self, state: &State, addresses: &[String]) -> Result<State, ToolError> {
        self.rewrite_state(state, |path| StateRmArgs {
            state_path: path.to_path_buf(),
            addresses: addresses.to_vec(),
        })
    }

    fn import(&self, state: &State, address: &str, id: &str) -> Result<State, ToolError> {
        self.rewrite_state(state, |path| ImportArgs {
            state_path: path.to_path_buf(),
            address: address.to_string(),
            id: id.to_string(),
        })
    }
}
