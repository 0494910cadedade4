//! Workflow phase transitions and status conditions
//!
//! Every reconciliation ends by folding the pipeline outcome into the staged
//! status. A fully successful pass advances the phase by one state, a pass
//! blocked on a dependency leaves it where it is, and an error either leaves
//! it in place for a retry or moves the workflow to a failure phase.

use chrono::{DateTime, Utc};

use crate::crd::{BatchingStatus, Condition, Direction, MoverStatus, Phase};
use crate::engine::StepOutcome;
use crate::error::{Error, Result};

/// Condition type maintained on every workflow record
pub const RECONCILED: &str = "Reconciled";

/// Reason recorded when a reconciliation fails
pub const REASON_ERROR: &str = "Error";

/// Reason recorded when a reconciliation succeeds
pub const REASON_COMPLETE: &str = "Complete";

/// Message recorded when a reconciliation succeeds
pub const SUCCESS_MESSAGE: &str = "Reconcile complete";

/// A phase change applied to a status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<Phase>,
    pub to: Phase,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != Some(self.to)
    }
}

/// The next state along the forward path
pub fn advance(direction: Direction, phase: Phase) -> Phase {
    match phase {
        Phase::Queued => Phase::Processing,
        Phase::Processing => direction.done_phase(),
        Phase::SnapshotBackupDone | Phase::SnapshotRestoreDone => Phase::Completed,
        other => other,
    }
}

/// Replace the condition with the same type, keeping its transition time
/// when the status did not change
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

pub fn reconciled(success: bool, message: impl Into<String>, now: DateTime<Utc>) -> Condition {
    Condition {
        type_: RECONCILED.to_string(),
        status: if success { "True" } else { "False" }.to_string(),
        last_transition_time: now,
        reason: Some(if success { REASON_COMPLETE } else { REASON_ERROR }.to_string()),
        message: Some(message.into()),
    }
}

/// Stamp the initial phase on a record seen for the first time
pub fn initialize(status: &mut MoverStatus, now: DateTime<Utc>) -> Transition {
    let from = status.phase;
    status.phase = Some(Phase::Queued);
    status.batching_status = Some(BatchingStatus::Queued);
    status.start_timestamp.get_or_insert(now);
    Transition {
        from,
        to: Phase::Queued,
    }
}

/// Fold one pipeline outcome into the staged status
///
/// `derived_present` tells whether this run created or found derived
/// resources, which turns a permanent failure into `PartiallyFailed`.
pub fn apply(
    direction: Direction,
    status: &mut MoverStatus,
    outcome: &Result<StepOutcome>,
    derived_present: bool,
    now: DateTime<Utc>,
) -> Transition {
    let from = status.phase;
    let current = from.unwrap_or_default();

    if current.is_failure() {
        return Transition { from, to: current };
    }

    let to = match outcome {
        Ok(StepOutcome::Continue) => {
            status.batching_status = Some(BatchingStatus::Completed);
            upsert_condition(&mut status.conditions, reconciled(true, SUCCESS_MESSAGE, now));
            advance(direction, current)
        }
        Ok(StepOutcome::NotReady) => {
            status.batching_status = Some(BatchingStatus::Processing);
            current
        }
        Err(e) if e.is_transient() => {
            if !e.is_silent() {
                upsert_condition(&mut status.conditions, reconciled(false, e.to_string(), now));
            }
            current
        }
        Err(e) => {
            upsert_condition(&mut status.conditions, reconciled(false, e.to_string(), now));
            failure_phase(e, derived_present || status.has_derived_artifacts())
        }
    };

    if to == Phase::Completed {
        status.completion_timestamp.get_or_insert(now);
    }
    status.phase = Some(to);
    Transition { from, to }
}

/// Failure phase for a permanent error
pub fn failure_phase(error: &Error, derived_present: bool) -> Phase {
    match error {
        Error::CleanupTimeout(_) => Phase::PartiallyFailed,
        _ if derived_present => Phase::PartiallyFailed,
        _ => Phase::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: Phase) -> MoverStatus {
        MoverStatus {
            phase: Some(phase),
            ..Default::default()
        }
    }

    fn condition(status: &MoverStatus) -> &Condition {
        status
            .conditions
            .iter()
            .find(|c| c.type_ == RECONCILED)
            .unwrap()
    }

    #[test]
    fn successful_passes_walk_the_forward_path() {
        let now = Utc::now();
        let mut st = MoverStatus::default();
        initialize(&mut st, now);

        let mut seen = vec![st.phase.unwrap()];
        for _ in 0..4 {
            apply(Direction::Backup, &mut st, &Ok(StepOutcome::Continue), true, now);
            seen.push(st.phase.unwrap());
        }

        assert_eq!(
            seen,
            vec![
                Phase::Queued,
                Phase::Processing,
                Phase::SnapshotBackupDone,
                Phase::Completed,
                Phase::Completed
            ]
        );
        assert_eq!(st.batching_status, Some(BatchingStatus::Completed));
        assert!(st.completion_timestamp.is_some());
        assert_eq!(condition(&st).message.as_deref(), Some(SUCCESS_MESSAGE));
    }

    #[test]
    fn restore_uses_its_own_done_phase() {
        assert_eq!(
            advance(Direction::Restore, Phase::Processing),
            Phase::SnapshotRestoreDone
        );
    }

    #[test]
    fn not_ready_holds_phase_and_marks_batching_in_progress() {
        let mut st = status(Phase::Processing);
        let t = apply(
            Direction::Backup,
            &mut st,
            &Ok(StepOutcome::NotReady),
            true,
            Utc::now(),
        );

        assert!(!t.changed());
        assert_eq!(st.phase, Some(Phase::Processing));
        assert_eq!(st.batching_status, Some(BatchingStatus::Processing));
        assert!(st.conditions.is_empty());
    }

    #[test]
    fn validation_error_before_any_artifact_fails() {
        let mut st = status(Phase::Queued);
        let err = Err(Error::validation("vsb protected ns cannot be empty"));
        let t = apply(Direction::Backup, &mut st, &err, false, Utc::now());

        assert_eq!(t.to, Phase::Failed);
        let c = condition(&st);
        assert_eq!(c.status, "False");
        assert_eq!(c.reason.as_deref(), Some(REASON_ERROR));
        assert_eq!(c.message.as_deref(), Some("vsb protected ns cannot be empty"));
    }

    #[test]
    fn permanent_error_after_artifacts_is_partial() {
        let mut st = status(Phase::Processing);
        let err = Err(Error::Replication("restic exited 1".to_string()));
        let t = apply(Direction::Backup, &mut st, &err, true, Utc::now());
        assert_eq!(t.to, Phase::PartiallyFailed);

        // Artifacts recorded by an earlier pass count as well
        let mut st = status(Phase::Processing);
        st.volume_snapshot_name = Some("snap1".to_string());
        let err = Err(Error::build("PersistentVolumeClaim", "no restore size"));
        let t = apply(Direction::Backup, &mut st, &err, false, Utc::now());
        assert_eq!(t.to, Phase::PartiallyFailed);
    }

    #[test]
    fn transient_errors_hold_phase() {
        let mut st = status(Phase::Processing);
        let err = Err(Error::not_found("Secret", "protected/restic"));
        apply(Direction::Restore, &mut st, &err, true, Utc::now());
        assert_eq!(st.phase, Some(Phase::Processing));
        assert_eq!(
            condition(&st).message.as_deref(),
            Some("Secret protected/restic not found")
        );

        let mut st = status(Phase::Processing);
        let err = Err(Error::Conflict("Secret protected/x".to_string()));
        apply(Direction::Restore, &mut st, &err, true, Utc::now());
        assert_eq!(st.phase, Some(Phase::Processing));
        assert!(st.conditions.is_empty());
    }

    #[test]
    fn failure_is_terminal() {
        let mut st = status(Phase::Failed);
        let t = apply(
            Direction::Backup,
            &mut st,
            &Ok(StepOutcome::Continue),
            false,
            Utc::now(),
        );
        assert_eq!(t.to, Phase::Failed);
        assert!(!t.changed());
    }

    #[test]
    fn upsert_keeps_transition_time_for_same_status() {
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let later = Utc::now();
        let mut conditions = vec![reconciled(false, "first", earlier)];

        upsert_condition(&mut conditions, reconciled(false, "second", later));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, earlier);
        assert_eq!(conditions[0].message.as_deref(), Some("second"));

        upsert_condition(&mut conditions, reconciled(true, SUCCESS_MESSAGE, later));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, later);
    }
}
