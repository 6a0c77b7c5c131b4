//! State migrator pipeline tests
//!
//! These tests verify:
//! - Apply pushes exactly the migrated state, once, after the backend is restored
//! - A detected diff or any earlier failure never pushes
//! - The backend override file never survives a run (success, failure, panic)
//! - Cancellation and tool failures map to the step that issued them
//! - The real process executor drives a terraform stand-in end to end

use std::cell::{Cell, RefCell};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tfmigrate::error::MigrateError;
use tfmigrate::process_guard::CancelToken;
use tfmigrate::tfexec::{InitArgs, PlanResult, State, Terraform, ToolError};
use tfmigrate::tfmigrate::{
    MigrationStage, MigratorOptions, OVERRIDE_FILE_NAME, StateAction, StateMigrator,
};

// =============================================================================
// Recording fake
// =============================================================================

/// In-process terraform stand-in that records every call
struct FakeTerraform {
    dir: TempDir,
    version: String,
    remote: State,
    plan_result: PlanResult,
    cancel_plan: bool,
    panic_in_plan: bool,
    fail_restore: bool,
    failing_address: Option<String>,
    calls: RefCell<Vec<String>>,
    pushed: RefCell<Vec<State>>,
    override_seen_by_plan: Cell<bool>,
    override_seen_by_push: Cell<bool>,
}

impl FakeTerraform {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            version: "1.0.0".to_string(),
            remote: State::from("S0"),
            plan_result: PlanResult::NoDiff,
            cancel_plan: false,
            panic_in_plan: false,
            fail_restore: false,
            failing_address: None,
            calls: RefCell::new(Vec::new()),
            pushed: RefCell::new(Vec::new()),
            override_seen_by_plan: Cell::new(false),
            override_seen_by_push: Cell::new(false),
        }
    }

    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn override_path(&self) -> PathBuf {
        self.dir.path().join(OVERRIDE_FILE_NAME)
    }

    fn exit_error(&self, args: &str, stderr: &str) -> ToolError {
        ToolError::Exit {
            args: args.split(' ').map(String::from).collect(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    /// Each edit appends itself, so S0 + mv a b becomes "S0|mv a b"
    fn edit(&self, state: &State, edit: &str) -> State {
        let mut bytes = state.as_bytes().to_vec();
        bytes.extend_from_slice(format!("|{}", edit).as_bytes());
        State::new(bytes)
    }
}

impl Terraform for FakeTerraform {
    fn dir(&self) -> &Path {
        self.dir.path()
    }

    fn version(&self) -> Result<String, ToolError> {
        self.record("version");
        Ok(self.version.clone())
    }

    fn init(&self, args: &InitArgs) -> Result<(), ToolError> {
        self.record(if args.reconfigure { "init -reconfigure" } else { "init" });
        Ok(())
    }

    fn restore_backend(&self) -> Result<(), ToolError> {
        self.record("restore");
        if self.fail_restore {
            return Err(self.exit_error("terraform init", "backend unreachable"));
        }
        Ok(())
    }

    fn state_pull(&self) -> Result<State, ToolError> {
        self.record("state pull");
        Ok(self.remote.clone())
    }

    fn plan(&self, _state: &State) -> Result<PlanResult, ToolError> {
        self.record("plan");
        self.override_seen_by_plan.set(self.override_path().exists());
        if self.panic_in_plan {
            panic!("plan exploded");
        }
        if self.cancel_plan {
            return Err(ToolError::Cancelled);
        }
        Ok(self.plan_result.clone())
    }

    fn state_push(&self, state: &State) -> Result<(), ToolError> {
        self.record("state push");
        self.override_seen_by_push.set(self.override_path().exists());
        self.pushed.borrow_mut().push(state.clone());
        Ok(())
    }

    fn state_mv(&self, state: &State, source: &str, destination: &str) -> Result<State, ToolError> {
        self.record("state mv");
        if self.failing_address.as_deref() == Some(source) {
            return Err(self.exit_error("terraform state mv", "Invalid source address"));
        }
        Ok(self.edit(state, &format!("mv {} {}", source, destination)))
    }

    fn state_rm(&self, state: &State, addresses: &[String]) -> Result<State, ToolError> {
        self.record("state rm");
        Ok(self.edit(state, &format!("rm {}", addresses.join(" "))))
    }

    fn import(&self, state: &State, address: &str, id: &str) -> Result<State, ToolError> {
        self.record("import");
        Ok(self.edit(state, &format!("import {} {}", address, id)))
    }
}

fn actions(list: &[&str]) -> Vec<StateAction> {
    StateAction::parse_all(list).unwrap()
}

// =============================================================================
// Pipeline properties
// =============================================================================

#[test]
fn test_apply_happy_path_pushes_migrated_state_once() {
    let tf = FakeTerraform::new();
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    migrator.apply().unwrap();

    let tf = migrator.terraform();
    assert_eq!(*tf.pushed.borrow(), vec![State::from("S0|mv a b")]);
    assert_eq!(
        tf.calls(),
        vec![
            "version",
            "init",
            "state pull",
            "state mv",
            "init -reconfigure",
            "plan",
            "restore",
            "state push",
        ]
    );
    assert!(tf.override_seen_by_plan.get());
    assert!(!tf.override_seen_by_push.get());
    assert!(!tf.override_path().exists());
    assert!(migrator.context().is_committed());
}

#[test]
fn test_actions_thread_state_in_order() {
    let tf = FakeTerraform::new();
    let mut migrator = StateMigrator::with_terraform(
        tf,
        actions(&["mv a b", "rm c d", "import aws_iam_user.alice alice"]),
    );

    migrator.apply().unwrap();

    assert_eq!(
        *migrator.terraform().pushed.borrow(),
        vec![State::from("S0|mv a b|rm c d|import aws_iam_user.alice alice")]
    );
}

#[test]
fn test_unexpected_diff_never_pushes() {
    let mut tf = FakeTerraform::new();
    tf.plan_result = PlanResult::DiffDetected {
        output: "Plan: 1 to add, 0 to change, 0 to destroy.".to_string(),
    };
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let err = migrator.apply().unwrap_err();

    assert!(matches!(err, MigrateError::UnexpectedDiff(_)));
    let tf = migrator.terraform();
    assert!(tf.pushed.borrow().is_empty());
    assert_eq!(tf.calls().last().map(String::as_str), Some("restore"));
    assert!(!tf.override_path().exists());
    assert_eq!(migrator.context().current_stage(), MigrationStage::RolledBack);
}

#[test]
fn test_plan_never_pushes() {
    let tf = FakeTerraform::new();
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    migrator.plan().unwrap();

    let tf = migrator.terraform();
    assert!(tf.pushed.borrow().is_empty());
    assert!(!tf.calls().contains(&"state push".to_string()));
    assert!(!tf.override_path().exists());
    assert!(!migrator.context().is_failed());
}

#[test]
fn test_action_failure_reports_index_and_skips_override() {
    let mut tf = FakeTerraform::new();
    tf.failing_address = Some("missing".to_string());
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b", "mv missing c"]));

    let err = migrator.apply().unwrap_err();

    match err {
        MigrateError::ActionFailed {
            index,
            action,
            reason,
        } => {
            assert_eq!(index, 1);
            assert_eq!(action, "mv missing c");
            assert!(reason.contains("Invalid source address"));
        }
        other => panic!("Expected ActionFailed, got {:?}", other),
    }
    let tf = migrator.terraform();
    assert!(!tf.calls().contains(&"init -reconfigure".to_string()));
    assert!(tf.pushed.borrow().is_empty());
    assert_eq!(migrator.context().failed_at(), Some(MigrationStage::StatePulled));
}

#[test]
fn test_cancellation_still_restores_backend() {
    let mut tf = FakeTerraform::new();
    tf.cancel_plan = true;
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let err = migrator.apply().unwrap_err();

    assert!(err.is_cancelled());
    assert!(matches!(err, MigrateError::CancelledOrTimedOut { ref step, .. } if step == "plan"));
    let tf = migrator.terraform();
    assert_eq!(tf.calls().last().map(String::as_str), Some("restore"));
    assert!(!tf.override_path().exists());
}

#[test]
fn test_restore_failure_does_not_mask_primary_error() {
    let mut tf = FakeTerraform::new();
    tf.plan_result = PlanResult::DiffDetected {
        output: "1 to destroy".to_string(),
    };
    tf.fail_restore = true;
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let err = migrator.apply().unwrap_err();
    assert!(matches!(err, MigrateError::UnexpectedDiff(_)));
    assert!(!migrator.terraform().override_path().exists());
}

#[test]
fn test_restore_failure_after_clean_plan_blocks_push() {
    let mut tf = FakeTerraform::new();
    tf.fail_restore = true;
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let err = migrator.apply().unwrap_err();
    assert!(matches!(err, MigrateError::InitializationFailed(ref m) if m.contains("backend unreachable")));
    assert!(migrator.terraform().pushed.borrow().is_empty());
}

#[test]
fn test_override_removed_when_plan_panics() {
    let mut tf = FakeTerraform::new();
    tf.panic_in_plan = true;
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let result = panic::catch_unwind(AssertUnwindSafe(|| migrator.apply()));

    assert!(result.is_err());
    let tf = migrator.terraform();
    assert!(!tf.override_path().exists());
    assert_eq!(tf.calls().last().map(String::as_str), Some("restore"));
}

#[test]
fn test_existing_override_file_aborts_before_init() {
    let tf = FakeTerraform::new();
    fs::write(tf.override_path(), "# mine\n").unwrap();
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["mv a b"]));

    let err = migrator.plan().unwrap_err();

    assert!(matches!(err, MigrateError::BackendOverride(_)));
    let tf = migrator.terraform();
    assert_eq!(fs::read_to_string(tf.override_path()).unwrap(), "# mine\n");
    assert!(!tf.calls().contains(&"init -reconfigure".to_string()));
    assert!(!tf.calls().contains(&"restore".to_string()));
}

#[test]
fn test_rerun_resets_context() {
    let tf = FakeTerraform::new();
    let mut migrator = StateMigrator::with_terraform(tf, actions(&["rm a"]));

    migrator.plan().unwrap();
    migrator.apply().unwrap();

    assert!(migrator.context().is_committed());
    assert_eq!(migrator.terraform().pushed.borrow().len(), 1);
}

// =============================================================================
// End to end through the process executor
// =============================================================================

/// A terraform stand-in: logs each invocation to calls.log in the working
/// directory, keeps the "remote" state in remote.tfstate, reports a diff
/// when a file named `diff` exists and refuses to run outside automation mode.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
[ "$TF_IN_AUTOMATION" = 1 ] || { echo "TF_IN_AUTOMATION is not set" >&2; exit 1; }
echo "$*" >> calls.log
case "$1" in
  version) echo "Terraform v1.0.0"; echo "on linux_amd64" ;;
  init) ;;
  state)
    case "$2" in
      pull) cat remote.tfstate ;;
      push) cp "$3" remote.tfstate ;;
      mv) f="${3#-state=}"; sed -i "s/$5/$6/" "$f" ;;
      *) exit 1 ;;
    esac ;;
  plan)
    [ -f slow ] && sleep 30
    [ -f diff ] && { echo "1 to change"; exit 2; }
    exit 0 ;;
  *) echo "unknown command $1" >&2; exit 1 ;;
esac
"#;

fn fake_terraform_workspace() -> (TempDir, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("fake-terraform");
    fs::write(&bin, FAKE_TERRAFORM).unwrap();
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    fs::write(work.join("remote.tfstate"), "resource null_resource.foo\n").unwrap();
    (dir, bin)
}

fn logged_calls(work: &Path) -> Vec<String> {
    fs::read_to_string(work.join("calls.log"))
        .unwrap()
        .lines()
        .map(|line| {
            // Temp file paths differ per run
            line.split(' ')
                .map(|w| {
                    if w.starts_with("-state=") {
                        "-state=TMP"
                    } else if w.contains("tfmigrate-") {
                        "TMP"
                    } else {
                        w
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[test]
fn test_process_executor_apply_end_to_end() {
    let (dir, bin) = fake_terraform_workspace();
    let work = dir.path().join("work");
    let options = MigratorOptions {
        exec_path: Some(bin.display().to_string()),
        timeout: Some(Duration::from_secs(30)),
        cancel: CancelToken::new(),
    };

    let mut migrator = StateMigrator::new(
        &work,
        actions(&["mv null_resource.foo null_resource.bar"]),
        &options,
    );
    migrator.apply().unwrap();

    assert_eq!(
        fs::read_to_string(work.join("remote.tfstate")).unwrap(),
        "resource null_resource.bar\n"
    );
    assert!(!work.join(OVERRIDE_FILE_NAME).exists());
    assert_eq!(
        logged_calls(&work),
        vec![
            "version",
            "init -input=false -no-color",
            "state pull",
            "state mv -state=TMP -backup=/dev/null null_resource.foo null_resource.bar",
            "init -input=false -no-color -reconfigure",
            "plan -state=TMP -input=false -no-color -detailed-exitcode",
            "init -input=false -no-color -reconfigure",
            "state push TMP",
        ]
    );
}

#[test]
fn test_process_executor_diff_leaves_remote_untouched() {
    let (dir, bin) = fake_terraform_workspace();
    let work = dir.path().join("work");
    fs::write(work.join("diff"), "").unwrap();
    let options = MigratorOptions {
        exec_path: Some(bin.display().to_string()),
        ..Default::default()
    };

    let mut migrator = StateMigrator::new(
        &work,
        actions(&["mv null_resource.foo null_resource.bar"]),
        &options,
    );
    let err = migrator.apply().unwrap_err();

    assert!(matches!(err, MigrateError::UnexpectedDiff(ref out) if out.contains("1 to change")));
    assert_eq!(
        fs::read_to_string(work.join("remote.tfstate")).unwrap(),
        "resource null_resource.foo\n"
    );
    assert!(!work.join(OVERRIDE_FILE_NAME).exists());
    assert!(!logged_calls(&work).iter().any(|c| c.starts_with("state push")));
}

#[test]
fn test_process_executor_cancel_interrupts_plan_and_restores() {
    let (dir, bin) = fake_terraform_workspace();
    let work = dir.path().join("work");
    fs::write(work.join("slow"), "").unwrap();
    let cancel = CancelToken::new();
    let options = MigratorOptions {
        exec_path: Some(bin.display().to_string()),
        timeout: None,
        cancel: cancel.clone(),
    };

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(2000));
        cancel.cancel();
    });

    let mut migrator = StateMigrator::new(
        &work,
        actions(&["mv null_resource.foo null_resource.bar"]),
        &options,
    );
    let err = migrator.apply().unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_cancelled());
    assert!(!work.join(OVERRIDE_FILE_NAME).exists());
    let calls = logged_calls(&work);
    assert_eq!(
        calls.last().map(String::as_str),
        Some("init -input=false -no-color -reconfigure")
    );
    assert!(!calls.iter().any(|c| c.starts_with("state push")));
}

#[test]
fn test_missing_executable_is_tool_unavailable() {
    let dir = TempDir::new().unwrap();
    let options = MigratorOptions {
        exec_path: Some(dir.path().join("no-such-terraform").display().to_string()),
        ..Default::default()
    };

    let mut migrator = StateMigrator::new(dir.path(), actions(&["rm a"]), &options);
    let err = migrator.plan().unwrap_err();
    assert!(matches!(err, MigrateError::ToolUnavailable(_)));
}
