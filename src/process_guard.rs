//! Process lifecycle management for terraform child processes
//!
//! A migration run spends nearly all of its time blocked on the external tool.
//! This module makes those invocations interruptible and keeps them from
//! outliving the migrator:
//!
//! - Children are spawned in their own process group with a parent-death signal
//! - Every child PID is tracked in a global registry while it runs
//! - A shared [`CancelToken`] lets a signal handler (or a caller) abort the
//!   in-flight invocation; the executor then terminates the whole group
//! - Cleanup work that must finish after an interrupt runs under a
//!   [`CancelShield`], which hides a pending cancellation until it is dropped
//! - Installed backend override files are tracked in an [`OverrideRegistry`]
//!   so a forced exit can still delete them

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Process groups of in-flight tool invocations
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Backend override files currently installed
static OVERRIDE_REGISTRY: OnceLock<Arc<Mutex<OverrideRegistry>>> = OnceLock::new();

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    shields: AtomicUsize,
}

/// Shared cancellation flag for tool invocations.
///
/// Clones observe the same flag. Cancellation is one-way.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current and all future invocations
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested and no shield is active
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst) && self.state.shields.load(Ordering::SeqCst) == 0
    }

    /// Returns true if cancellation was requested, shielded or not
    pub fn is_requested(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Hide a pending cancellation until the returned shield is dropped.
    pub fn shield(&self) -> CancelShield {
        self.state.shields.fetch_add(1, Ordering::SeqCst);
        CancelShield {
            state: Arc::clone(&self.state),
        }
    }
}

/// Guard returned by [`CancelToken::shield`]
#[derive(Debug)]
pub struct CancelShield {
    state: Arc<CancelState>,
}

impl Drop for CancelShield {
    fn drop(&mut self) {
        self.state.shields.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Tool invocations that are still running, keyed by process group leader
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Group leader PIDs
    pids: HashSet<u32>,
    /// Set once teardown has started; later calls are no-ops
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by every executor
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!(pid, "registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!(pid, "unregistered child process");
    }

    /// Number of invocations still running
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Stop every running invocation.
    ///
    /// Each group gets `SIGTERM`, then `SIGKILL` if it outlives `grace_period`.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        tracing::info!(count = self.pids.len(), "terminating child processes");
        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            terminate_group(pid, grace_period);
        }
        self.pids.clear();
    }
}

/// Backend override files that exist on disk right now.
///
/// The override guard registers its file on install and unregisters it once
/// removed. Anything still registered when the process is forced to exit is
/// deleted by [`OverrideRegistry::remove_all`].
#[derive(Debug, Default)]
pub struct OverrideRegistry {
    paths: HashSet<PathBuf>,
}

impl OverrideRegistry {
    /// Process-wide registry shared by every override guard
    pub fn global() -> Arc<Mutex<OverrideRegistry>> {
        OVERRIDE_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(OverrideRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, path: &Path) {
        self.paths.insert(path.to_path_buf());
        tracing::debug!(path = %path.display(), "registered backend override");
    }

    pub fn unregister(&mut self, path: &Path) {
        self.paths.remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn count(&self) -> usize {
        self.paths.len()
    }

    /// Delete every registered file and forget it. Returns the files deleted.
    pub fn remove_all(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for path in self.paths.drain() {
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove backend override"
                    );
                }
            }
        }
        removed
    }
}

/// Send `SIGTERM` to a process group, escalate to `SIGKILL` after `grace_period`.
pub(crate) fn terminate_group(pgid: u32, grace_period: Duration) {
    if let Err(e) = send_signal_to_group(pgid, Signal::SIGTERM) {
        tracing::warn!(pgid, error = %e, "failed to send SIGTERM to process group");
        let _ = send_signal(pgid, Signal::SIGTERM);
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !is_process_alive(pgid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if is_process_alive(pgid) {
        tracing::warn!(pgid, "process group did not terminate, sending SIGKILL");
        if send_signal_to_group(pgid, Signal::SIGKILL).is_err() {
            let _ = send_signal(pgid, Signal::SIGKILL);
        }
    }
}

/// Signal a single PID
fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group.
/// Terraform spawns provider plugins; the negative PID reaches them too.
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// False once `pid` has exited or is a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Held by `main`; stops any invocation still running when the process exits
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Attach to the process-wide registry
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    /// Invocations still running
    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Initialize signal handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The first signal cancels `token`: the running tool invocation is killed and
/// the migrator unwinds through its cleanup. A second signal terminates any
/// remaining children, deletes registered override files and exits with
/// `128 + signal`.
pub fn init_signal_handlers(token: CancelToken) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            if !token.is_requested() {
                tracing::warn!(
                    signal = signal_name,
                    "interrupt received, cancelling and restoring the working directory"
                );
                token.cancel();
                continue;
            }

            tracing::error!(signal = signal_name, "second interrupt received, exiting");
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            // Drop of the override guard never runs past exit
            let removed = match OverrideRegistry::global().lock() {
                Ok(mut overrides) => overrides.remove_all(),
                Err(poisoned) => poisoned.into_inner().remove_all(),
            };
            for path in &removed {
                tracing::warn!(
                    path = %path.display(),
                    "removed backend override; run `terraform init -reconfigure` before the next plan"
                );
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Spawn configuration for tool invocations
pub trait CommandProcessGroup {
    /// Lead a new process group and receive `SIGTERM` if this process dies
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // The tool must not keep rewriting state after we are gone
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
