//! Type-safe terraform argument contracts.
//!
//! Every subcommand the migrator issues has a struct implementing
//! [`ToolArgs`]. The struct definition is the contract: the exact flag vector
//! lives in one place and is covered by unit tests, instead of being
//! assembled from string slices at each call site.
//!
//! # Example
//!
//! ```
//! use std::path::PathBuf;
//! use tfmigrate::tfexec::{StateMvArgs, ToolArgs};
//!
//! let args = StateMvArgs {
//!     state_path: PathBuf::from("/tmp/current.tfstate"),
//!     source: "aws_instance.foo".to_string(),
//!     destination: "aws_instance.bar".to_string(),
//! };
//!
//! assert_eq!(args.subcommand(), ["state", "mv"]);
//! assert_eq!(
//!     args.to_cli_args(),
//!     vec!["-state=/tmp/current.tfstate", "-backup=/dev/null", "aws_instance.foo", "aws_instance.bar"]
//! );
//! ```

use std::path::{Path, PathBuf};

/// Flags that keep terraform from prompting or colouring output
const NON_INTERACTIVE: [&str; 2] = ["-input=false", "-no-color"];

/// State subcommands write a backup next to the state by default; the
/// candidate state is a throwaway temp file, so the backup is discarded.
const NO_BACKUP: &str = "-backup=/dev/null";

/// Trait for typed terraform arguments.
///
/// # Contract
///
/// - `subcommand()`: the subcommand words, e.g. `["state", "pull"]`
/// - `to_cli_args()`: flags and positional arguments that follow them
///
/// The executable path is prepended by the client.
pub trait ToolArgs {
    /// Subcommand words following the executable
    fn subcommand(&self) -> &'static [&'static str];

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;
}

fn state_flag(path: &Path) -> String {
    format!("-state={}", path.display())
}

/// `terraform version`
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionArgs;

impl ToolArgs for VersionArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["version"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// `terraform init -input=false -no-color [-reconfigure]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitArgs {
    /// Ignore any saved backend configuration (required when switching backends)
    pub reconfigure: bool,
}

impl InitArgs {
    pub fn reconfigure() -> Self {
        Self { reconfigure: true }
    }
}

impl ToolArgs for InitArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["init"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = NON_INTERACTIVE.iter().map(|s| s.to_string()).collect();
        if self.reconfigure {
            args.push("-reconfigure".to_string());
        }
        args
    }
}

/// `terraform state pull`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatePullArgs;

impl ToolArgs for StatePullArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["state", "pull"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// `terraform plan -state=<path> -input=false -no-color -detailed-exitcode`
///
/// With `-detailed-exitcode` terraform exits 0 for an empty plan, 2 for a
/// non-empty plan and 1 on error.
#[derive(Debug, Clone)]
pub struct PlanArgs {
    pub state_path: PathBuf,
}

impl ToolArgs for PlanArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["plan"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![state_flag(&self.state_path)];
        args.extend(NON_INTERACTIVE.iter().map(|s| s.to_string()));
        args.push("-detailed-exitcode".to_string());
        args
    }
}

/// `terraform state push <path>`
#[derive(Debug, Clone)]
pub struct StatePushArgs {
    pub state_path: PathBuf,
}

impl ToolArgs for StatePushArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["state", "push"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.state_path.display().to_string()]
    }
}

/// `terraform state mv -state=<path> -backup=/dev/null <source> <destination>`
#[derive(Debug, Clone)]
pub struct StateMvArgs {
    pub state_path: PathBuf,
    pub source: String,
    pub destination: String,
}

impl ToolArgs for StateMvArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["state", "mv"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            state_flag(&self.state_path),
            NO_BACKUP.to_string(),
            self.source.clone(),
            self.destination.clone(),
        ]
    }
}

/// `terraform state rm -state=<path> -backup=/dev/null <address>...`
#[derive(Debug, Clone)]
pub struct StateRmArgs {
    pub state_path: PathBuf,
    pub addresses: Vec<String>,
}

impl ToolArgs for StateRmArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["state", "rm"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![state_flag(&self.state_path), NO_BACKUP.to_string()];
        args.extend(self.addresses.iter().cloned());
        args
    }
}

/// `terraform import -input=false -no-color -state=<path> <address> <id>`
#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub state_path: PathBuf,
    pub address: String,
    pub id: String,
}

impl ToolArgs for ImportArgs {
    fn subcommand(&self) -> &'static [&'static str] {
        &["import"]
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = NON_INTERACTIVE.iter().map(|s| s.to_string()).collect();
        args.push(state_flag(&self.state_path));
        args.push(self.address.clone());
        args.push(self.id.clone());
        args
    }
}
