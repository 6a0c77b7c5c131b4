//! Driving the terraform binary.
//!
//! - [`executor`]: running command lines ([`ProcessExecutor`]) with capture,
//!   cancellation and timeouts
//! - [`mock`]: the scripted [`MockExecutor`] used by tests
//! - [`args`]: typed argument contracts for every subcommand
//! - [`state`]: the opaque [`State`] value
//! - [`terraform`]: the [`Terraform`] capability trait and [`TerraformCli`]

pub mod args;
pub mod executor;
pub mod mock;
pub mod state;
pub mod terraform;

pub use args::{
    ImportArgs, InitArgs, PlanArgs, StateMvArgs, StatePullArgs, StatePushArgs, StateRmArgs,
    ToolArgs, VersionArgs,
};
pub use executor::{CommandOutput, Executor, ProcessExecutor, ToolError};
pub use mock::{MockCommand, MockEffect, MockExecutor, state_path_arg};
pub use state::State;
pub use terraform::{
    DEFAULT_EXEC_PATH, EXEC_PATH_ENV, PlanResult, Terraform, TerraformCli, parse_version,
};
