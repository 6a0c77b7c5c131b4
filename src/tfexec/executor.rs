//! Command execution for the terraform binary.
//!
//! [`Executor`] is the seam between the typed tool client and the operating
//! system. A non-zero exit status is a normal [`CommandOutput`], never an
//! error of the executor itself; only failing to run the process (or being
//! cancelled while it runs) is.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::process_guard::{self, CancelToken, ChildRegistry, CommandProcessGroup};

/// How often a running child is polled for exit, cancellation and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period between SIGTERM and SIGKILL when aborting a child
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Errors raised while driving the external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The executable could not be started
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Temporary state files or output pipes failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The command ran but reported failure
    #[error("`{}` exited with {}: {}", .args.join(" "), exit_code_label(.code), .stderr.trim())]
    Exit {
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    /// `version` produced output that does not name a version
    #[error("unrecognized version output: {0:?}")]
    UnrecognizedVersion(String),

    /// A scripted executor received a command it did not expect
    #[error("unexpected command: {0}")]
    UnexpectedCommand(String),

    /// The invocation was aborted through a [`CancelToken`]
    #[error("command was cancelled")]
    Cancelled,

    /// The invocation exceeded its timeout
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output of the command.
    pub stdout: String,
    /// Standard error of the command.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs command lines in a fixed working directory.
///
/// `args[0]` is the program, the rest are its arguments.
pub trait Executor {
    /// Working directory every command runs in
    fn dir(&self) -> &Path;

    /// Run a command and capture its output.
    fn run(&self, args: &[String]) -> Result<CommandOutput, ToolError>;

    /// Run a command that must finish even if cancellation was requested.
    ///
    /// Timeouts still apply.
    fn run_to_completion(&self, args: &[String]) -> Result<CommandOutput, ToolError> {
        self.run(args)
    }
}

/// [`Executor`] backed by real child processes.
///
/// Children inherit the host environment plus any variables added with
/// [`ProcessExecutor::with_env`], run in their own process group and are
/// tracked in the global [`ChildRegistry`] while alive.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    dir: PathBuf,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl ProcessExecutor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            env: Vec::new(),
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Add an environment variable on top of the inherited environment
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Bound every invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn execute(&self, args: &[String]) -> Result<CommandOutput, ToolError> {
        let (program, rest) = args.split_first().ok_or_else(|| {
            ToolError::Io(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))
        })?;

        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        tracing::debug!(dir = %self.dir.display(), ?args, "running command");

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        let status = self.wait(&mut child, pid);

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let status = status?;
        let stdout = join_reader(stdout)?;
        let stderr = join_reader(stderr)?;

        tracing::debug!(code = ?status.code(), "command finished");

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }

    fn wait(&self, child: &mut Child, pid: u32) -> Result<ExitStatus, ToolError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if self.cancel.is_cancelled() {
                tracing::warn!(pid, "cancellation requested, terminating command");
                abort_child(child, pid);
                return Err(ToolError::Cancelled);
            }

            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    tracing::warn!(pid, ?timeout, "command timed out, terminating");
                    abort_child(child, pid);
                    return Err(ToolError::TimedOut(timeout));
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Executor for ProcessExecutor {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn run(&self, args: &[String]) -> Result<CommandOutput, ToolError> {
        self.execute(args)
    }

    fn run_to_completion(&self, args: &[String]) -> Result<CommandOutput, ToolError> {
        let _shield = self.cancel.shield();
        self.execute(args)
    }
}

fn abort_child(child: &mut Child, pid: u32) {
    process_guard::terminate_group(pid, KILL_GRACE_PERIOD);
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_reader(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<String, ToolError> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| io::Error::other("output reader thread panicked"))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
