//! Migration State Machine
//!
//! Tracks how far a single migration run has progressed and rejects
//! out-of-order transitions, so the pipeline cannot push a state that was
//! never diff-checked.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! VersionChecked
//!     ↓
//! Initialized
//!     ↓
//! StatePulled
//!     ↓
//! ActionsApplied
//!     ↓
//! BackendOverridden
//!     ↓
//! DiffVerified ──────→ RolledBack (plan finished, nothing committed)
//!     ↓
//! Committed (apply only)
//!
//! (Any non-terminal stage can transition to RolledBack on failure)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Migration stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MigrationStage {
    /// Nothing has been run yet
    NotStarted = 0,

    /// The tool answered `version`
    VersionChecked = 1,

    /// Working directory initialized against the configured backend
    Initialized = 2,

    /// Current remote state fetched
    StatePulled = 3,

    /// Every action produced a new candidate state
    ActionsApplied = 4,

    /// Local backend override installed and re-initialized
    BackendOverridden = 5,

    /// Plan against the candidate state reported no changes
    DiffVerified = 6,

    /// Candidate state pushed to the remote backend (terminal)
    Committed = 7,

    /// Run ended without committing anything (terminal)
    RolledBack = 255,
}

impl MigrationStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Returns the next stage of an apply run, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::VersionChecked),
            Self::VersionChecked => Some(Self::Initialized),
            Self::Initialized => Some(Self::StatePulled),
            Self::StatePulled => Some(Self::ActionsApplied),
            Self::ActionsApplied => Some(Self::BackendOverridden),
            Self::BackendOverridden => Some(Self::DiffVerified),
            Self::DiffVerified => Some(Self::Committed),
            Self::Committed | Self::RolledBack => None,
        }
    }

    /// Returns true if the backend override file may exist at this stage
    #[inline]
    pub const fn holds_override(self) -> bool {
        matches!(self, Self::BackendOverridden | Self::DiffVerified)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::VersionChecked => "version checked",
            Self::Initialized => "initialized",
            Self::StatePulled => "state pulled",
            Self::ActionsApplied => "actions applied",
            Self::BackendOverridden => "backend overridden",
            Self::DiffVerified => "diff verified",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }

    /// Returns all stages of an apply run in order (excluding RolledBack)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::VersionChecked,
            Self::Initialized,
            Self::StatePulled,
            Self::ActionsApplied,
            Self::BackendOverridden,
            Self::DiffVerified,
            Self::Committed,
        ]
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("cannot skip from {from} to {to}")]
    SkippedStage {
        from: MigrationStage,
        to: MigrationStage,
    },

    #[error("cannot go backwards from {from} to {to}")]
    BackwardTransition {
        from: MigrationStage,
        to: MigrationStage,
    },

    #[error("cannot transition from terminal stage {from}")]
    FromTerminalState { from: MigrationStage },

    #[error("already at stage {stage}")]
    AlreadyAtStage { stage: MigrationStage },

    /// A dry run can only finish once the diff has been verified
    #[error("cannot finish a dry run at stage {stage}")]
    NotVerified { stage: MigrationStage },
}

impl From<StageTransitionError> for crate::error::MigrateError {
    fn from(err: StageTransitionError) -> Self {
        crate::error::MigrateError::StageTransition(err.to_string())
    }
}

/// Progress of one migration run.
///
/// # Example
///
/// ```
/// use tfmigrate::tfmigrate::{MigrationContext, MigrationStage};
///
/// let mut ctx = MigrationContext::new();
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), MigrationStage::VersionChecked);
///
/// // Pushing before the diff is verified is impossible
/// assert!(ctx.transition_to(MigrationStage::Committed).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct MigrationContext {
    current: MigrationStage,
    failed_at: Option<MigrationStage>,
    stage_history: Vec<(MigrationStage, DateTime<Utc>)>,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationContext {
    pub fn new() -> Self {
        Self {
            current: MigrationStage::NotStarted,
            failed_at: None,
            stage_history: Vec::with_capacity(MigrationStage::all_stages().len()),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> MigrationStage {
        self.current
    }

    /// Returns the stage at which the run failed, if it did
    #[inline]
    pub fn failed_at(&self) -> Option<MigrationStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        self.current == MigrationStage::Committed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Returns the visited stages with the time each was entered
    pub fn stage_history(&self) -> &[(MigrationStage, DateTime<Utc>)] {
        &self.stage_history
    }

    /// Advance to the next stage in sequence.
    pub fn advance(&mut self) -> Result<MigrationStage, StageTransitionError> {
        let Some(next_stage) = self.current.next() else {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        };

        self.record(next_stage);
        Ok(next_stage)
    }

    /// Transition to `target`, which must be the immediate next stage.
    pub fn transition_to(
        &mut self,
        target: MigrationStage,
    ) -> Result<MigrationStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        // RolledBack is reached through fail() or finish_dry_run()
        if target == MigrationStage::RolledBack || self.current.next() != Some(target) {
            if target.order() < self.current.order() {
                return Err(StageTransitionError::BackwardTransition {
                    from: self.current,
                    to: target,
                });
            }
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.record(target);
        Ok(target)
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.record(MigrationStage::RolledBack);
        Ok(())
    }

    /// End a plan run successfully: the diff was verified and the override is gone.
    pub fn finish_dry_run(&mut self) -> Result<(), StageTransitionError> {
        if self.current != MigrationStage::DiffVerified {
            return Err(StageTransitionError::NotVerified {
                stage: self.current,
            });
        }

        self.record(MigrationStage::RolledBack);
        Ok(())
    }

    fn record(&mut self, stage: MigrationStage) {
        tracing::debug!(from = %self.current, to = %stage, "migration stage transition");
        self.stage_history.push((stage, Utc::now()));
        self.current = stage;
    }

    /// Reset the context to NotStarted, clearing history.
    pub fn reset(&mut self) {
        self.current = MigrationStage::NotStarted;
        self.failed_at = None;
        self.stage_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_sequential() {
        for (i, stage) in MigrationStage::all_stages().iter().enumerate() {
            assert_eq!(stage.order() as usize, i, "Stage {:?} should have order {}", stage, i);
        }
    }

    #[test]
    fn test_stage_next_forms_chain() {
        let mut current = MigrationStage::NotStarted;
        let mut count = 0;
        while let Some(next) = current.next() {
            current = next;
            count += 1;
            assert!(count < 20, "Infinite loop detected in stage chain");
        }
        assert_eq!(current, MigrationStage::Committed);
        assert_eq!(count, 7);
    }

    #[test]
    fn test_only_override_stages_hold_override() {
        for stage in MigrationStage::all_stages() {
            let expected = matches!(
                stage,
                MigrationStage::BackendOverridden | MigrationStage::DiffVerified
            );
            assert_eq!(stage.holds_override(), expected, "{:?}", stage);
        }
        assert!(!MigrationStage::RolledBack.holds_override());
    }

    #[test]
    fn test_advance_through_apply() {
        let mut ctx = MigrationContext::new();
        while ctx.advance().is_ok() {}

        assert!(ctx.is_committed());
        assert!(!ctx.is_failed());
        assert_eq!(ctx.stage_history().len(), 7);
    }

    #[test]
    fn test_cannot_skip_to_commit() {
        let mut ctx = MigrationContext::new();
        for _ in 0..4 {
            ctx.advance().unwrap();
        }
        assert_eq!(ctx.current_stage(), MigrationStage::ActionsApplied);

        let err = ctx.transition_to(MigrationStage::Committed).unwrap_err();
        assert!(matches!(err, StageTransitionError::SkippedStage { .. }));

        let err = ctx.transition_to(MigrationStage::Initialized).unwrap_err();
        assert!(matches!(err, StageTransitionError::BackwardTransition { .. }));

        let err = ctx.transition_to(MigrationStage::ActionsApplied).unwrap_err();
        assert!(matches!(err, StageTransitionError::AlreadyAtStage { .. }));

        ctx.transition_to(MigrationStage::BackendOverridden).unwrap();
    }

    #[test]
    fn test_fail_records_stage() {
        let mut ctx = MigrationContext::new();
        ctx.advance().unwrap();
        ctx.advance().unwrap();
        ctx.fail().unwrap();

        assert_eq!(ctx.current_stage(), MigrationStage::RolledBack);
        assert_eq!(ctx.failed_at(), Some(MigrationStage::Initialized));
        assert!(matches!(
            ctx.advance(),
            Err(StageTransitionError::FromTerminalState { .. })
        ));
        assert!(ctx.fail().is_err());
    }

    #[test]
    fn test_finish_dry_run_requires_verified_diff() {
        let mut ctx = MigrationContext::new();
        ctx.advance().unwrap();
        assert!(matches!(
            ctx.finish_dry_run(),
            Err(StageTransitionError::NotVerified { .. })
        ));

        while ctx.current_stage() != MigrationStage::DiffVerified {
            ctx.advance().unwrap();
        }
        ctx.finish_dry_run().unwrap();
        assert_eq!(ctx.current_stage(), MigrationStage::RolledBack);
        assert!(!ctx.is_failed());
    }

    #[test]
    fn test_cannot_transition_to_rolled_back_directly() {
        let mut ctx = MigrationContext::new();
        assert!(ctx.transition_to(MigrationStage::RolledBack).is_err());
    }

    #[test]
    fn test_reset() {
        let mut ctx = MigrationContext::new();
        ctx.advance().unwrap();
        ctx.fail().unwrap();
        ctx.reset();

        assert_eq!(ctx.current_stage(), MigrationStage::NotStarted);
        assert!(ctx.failed_at().is_none());
        assert!(ctx.stage_history().is_empty());
    }

    #[test]
    fn test_error_converts_to_migrate_error() {
        let err: crate::error::MigrateError = StageTransitionError::AlreadyAtStage {
            stage: MigrationStage::Committed,
        }
        .into();
        assert!(err.to_string().contains("already at stage committed"));
    }
}
