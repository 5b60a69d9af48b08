//! Run State Machine.
//!
//! pending → phase1_running → phase1_complete → {phase2_running ⇄ paused}
//!   → phase2_complete → completed, with phase1_complete → completed when
//! Phase 2 is skipped and a sticky `failed` reachable from any running state.
//!
//! Persisted status is the only authority: every transition is a
//! compare-and-set against the store, so two sessions cannot both win.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::{RankingRun, RunStatus};
use crate::ranking::store::RunStore;

/// The screen a client should show for a run, derived purely from its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStage {
    Setup,
    Scoring,
    Phase1Review,
    Enriching,
    Paused,
    Finalizing,
    Results,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Phase1Running)
                | (Phase1Running, Phase1Complete)
                | (Phase1Complete, Phase2Running)
                | (Phase1Complete, Completed)
                | (Phase2Running, Paused)
                | (Paused, Phase2Running)
                | (Phase2Running, Phase2Complete)
                | (Phase2Complete, Completed)
                | (Phase1Running, Failed)
                | (Phase2Running, Failed)
                | (Paused, Failed)
                | (Phase2Complete, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn resume_stage(self) -> ResumeStage {
        match self {
            RunStatus::Pending => ResumeStage::Setup,
            RunStatus::Phase1Running => ResumeStage::Scoring,
            RunStatus::Phase1Complete => ResumeStage::Phase1Review,
            RunStatus::Phase2Running => ResumeStage::Enriching,
            RunStatus::Paused => ResumeStage::Paused,
            RunStatus::Phase2Complete => ResumeStage::Finalizing,
            RunStatus::Completed => ResumeStage::Results,
            RunStatus::Failed => ResumeStage::Failed,
        }
    }
}

/// Guard for entering Phase 1: criteria set and at least one record.
pub fn check_phase1_entry(run: &RankingRun) -> Result<(), AppError> {
    if !run.criteria.0.is_set() {
        return Err(AppError::Validation(
            "Qualification criteria must include a target title, industry, or description"
                .to_string(),
        ));
    }
    if run.total_records <= 0 {
        return Err(AppError::Validation(
            "Run has no records to score".to_string(),
        ));
    }
    Ok(())
}

/// Guard for leaving Phase 1 review into Phase 2: a non-empty gray zone.
pub fn check_phase2_entry(run: &RankingRun) -> Result<(), AppError> {
    if run.status != RunStatus::Phase1Complete {
        return Err(AppError::Conflict(format!(
            "Phase 2 can only start after Phase 1 completes (status: {})",
            run.status
        )));
    }
    if run.phase2_total <= 0 {
        return Err(AppError::Conflict(
            "No borderline records to enrich; finalize the run instead".to_string(),
        ));
    }
    Ok(())
}

/// Validates and persists `from → to`. Fails with `Conflict` when the
/// transition is illegal or another session already moved the run.
pub async fn transition(
    store: &dyn RunStore,
    run_id: Uuid,
    from: RunStatus,
    to: RunStatus,
) -> Result<(), AppError> {
    if !from.can_transition_to(to) {
        return Err(AppError::Conflict(format!(
            "Illegal run transition {from} → {to}"
        )));
    }
    if !store.compare_and_set_status(run_id, from, to).await? {
        return Err(AppError::Conflict(format!(
            "Run {run_id} is no longer {from}"
        )));
    }
    info!(run_id = %run_id, "Run transitioned {from} → {to}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::criteria::{ProtectedKeywords, QualificationCriteria};
    use crate::models::run::NewRun;
    use crate::ranking::memory_store::InMemoryRunStore;

    const ALL: [RunStatus; 8] = [
        RunStatus::Pending,
        RunStatus::Phase1Running,
        RunStatus::Phase1Complete,
        RunStatus::Phase2Running,
        RunStatus::Paused,
        RunStatus::Phase2Complete,
        RunStatus::Completed,
        RunStatus::Failed,
    ];

    fn make_run(criteria: QualificationCriteria, total: i64) -> RankingRun {
        RankingRun::new(
            NewRun {
                owner_id: Uuid::new_v4(),
                name: "test".to_string(),
                criteria,
                protected_keywords: ProtectedKeywords::default(),
            },
            total,
        )
    }

    fn set_criteria() -> QualificationCriteria {
        QualificationCriteria {
            target_titles: vec!["CTO".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!RunStatus::Completed.can_transition_to(next));
            assert!(!RunStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_paused_only_from_phase2_running() {
        for from in ALL {
            let allowed = from.can_transition_to(RunStatus::Paused);
            assert_eq!(allowed, from == RunStatus::Phase2Running, "from {from}");
        }
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Phase2Running));
    }

    #[test]
    fn test_completed_only_via_finalizable_states() {
        let sources: Vec<_> = ALL
            .into_iter()
            .filter(|s| s.can_transition_to(RunStatus::Completed))
            .collect();
        assert_eq!(
            sources,
            vec![RunStatus::Phase1Complete, RunStatus::Phase2Complete]
        );
    }

    #[test]
    fn test_failed_reachable_from_running_states_only() {
        assert!(RunStatus::Phase1Running.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Phase2Running.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn test_resume_stage_covers_every_status() {
        assert_eq!(RunStatus::Pending.resume_stage(), ResumeStage::Setup);
        assert_eq!(RunStatus::Phase1Complete.resume_stage(), ResumeStage::Phase1Review);
        assert_eq!(RunStatus::Paused.resume_stage(), ResumeStage::Paused);
        assert_eq!(RunStatus::Completed.resume_stage(), ResumeStage::Results);
        assert_eq!(RunStatus::Failed.resume_stage(), ResumeStage::Failed);
    }

    #[test]
    fn test_phase1_entry_requires_criteria_and_records() {
        assert!(check_phase1_entry(&make_run(QualificationCriteria::default(), 10)).is_err());
        assert!(check_phase1_entry(&make_run(set_criteria(), 0)).is_err());
        assert!(check_phase1_entry(&make_run(set_criteria(), 10)).is_ok());
    }

    #[test]
    fn test_phase2_entry_requires_gray_zone() {
        let mut run = make_run(set_criteria(), 10);
        run.status = RunStatus::Phase1Complete;
        assert!(matches!(check_phase2_entry(&run), Err(AppError::Conflict(_))));
        run.phase2_total = 3;
        assert!(check_phase2_entry(&run).is_ok());
        run.status = RunStatus::Pending;
        assert!(check_phase2_entry(&run).is_err());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = InMemoryRunStore::new();
        let run = store
            .create_run(
                NewRun {
                    owner_id: Uuid::new_v4(),
                    name: "cas".to_string(),
                    criteria: set_criteria(),
                    protected_keywords: ProtectedKeywords::default(),
                },
                vec![Default::default()],
            )
            .await
            .unwrap();

        transition(&store, run.id, RunStatus::Pending, RunStatus::Phase1Running)
            .await
            .unwrap();
        // Second session loses the race.
        let err = transition(&store, run.id, RunStatus::Pending, RunStatus::Phase1Running)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        // Illegal edges are rejected before touching the store.
        let err = transition(&store, run.id, RunStatus::Phase1Running, RunStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
