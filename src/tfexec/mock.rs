//! Scripted [`Executor`] for hermetic tests.
//!
//! A [`MockExecutor`] holds an ordered list of expected command lines, each
//! with canned output. Invocations are matched strictly in order; an
//! expected argument ending in `*` matches any actual argument starting with
//! the text before the `*`, which covers temporary file paths such as
//! `-state=/tmp/.tmpXYZ`.
//!
//! ```
//! use tfmigrate::tfexec::{Executor, MockCommand, MockExecutor};
//!
//! let executor = MockExecutor::new(vec![
//!     MockCommand::new(&["terraform", "version"]).stdout("Terraform v1.0.0\n"),
//! ]);
//! let output = executor.run(&["terraform".to_string(), "version".to_string()]).unwrap();
//! assert_eq!(output.stdout, "Terraform v1.0.0\n");
//! assert!(executor.is_exhausted());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::executor::{CommandOutput, Executor, ToolError};

/// Callback run against the actual arguments before output is returned
pub type MockEffect = Box<dyn Fn(&[String]) -> io::Result<()> + Send>;

/// One expected invocation and its canned result.
pub struct MockCommand {
    /// Expected argument vector, program first
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Optional side effect, e.g. rewriting the file passed with `-state=`
    pub effect: Option<MockEffect>,
}

impl MockCommand {
    pub fn new(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            effect: None,
        }
    }

    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn effect(mut self, effect: impl Fn(&[String]) -> io::Result<()> + Send + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    fn matches(&self, actual: &[String]) -> bool {
        self.args.len() == actual.len()
            && self
                .args
                .iter()
                .zip(actual)
                .all(|(expected, actual)| match expected.strip_suffix('*') {
                    Some(prefix) => actual.starts_with(prefix),
                    None => expected == actual,
                })
    }
}

impl fmt::Debug for MockCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCommand")
            .field("args", &self.args)
            .field("exit_code", &self.exit_code)
            .field("effect", &self.effect.is_some())
            .finish()
    }
}

/// [`Executor`] that replays a script of [`MockCommand`]s.
#[derive(Debug)]
pub struct MockExecutor {
    dir: PathBuf,
    expected: Mutex<VecDeque<MockCommand>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockExecutor {
    pub fn new(commands: Vec<MockCommand>) -> Self {
        Self {
            dir: PathBuf::from("."),
            expected: Mutex::new(commands.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report `dir` as the working directory
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Every command line received so far, in order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Whether every scripted command has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.expected.lock().map(|q| q.is_empty()).unwrap_or(false)
    }
}

impl Executor for MockExecutor {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn run(&self, args: &[String]) -> Result<CommandOutput, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args.to_vec());
        }

        let next = self
            .expected
            .lock()
            .map_err(|_| io::Error::other("mock executor lock poisoned"))?
            .pop_front();

        let Some(command) = next else {
            return Err(ToolError::UnexpectedCommand(format!(
                "`{}` (no more commands scripted)",
                args.join(" ")
            )));
        };

        if !command.matches(args) {
            return Err(ToolError::UnexpectedCommand(format!(
                "got `{}`, expected `{}`",
                args.join(" "),
                command.args.join(" ")
            )));
        }

        if let Some(effect) = &command.effect {
            effect(args)?;
        }

        Ok(CommandOutput {
            stdout: command.stdout,
            stderr: command.stderr,
            exit_code: Some(command.exit_code),
        })
    }
}

/// Path passed with `-state=` in a command line, if any
pub fn state_path_arg(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .find_map(|arg| arg.strip_prefix("-state="))
        .map(PathBuf::from)
}
