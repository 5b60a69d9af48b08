//! Finalization: the single run-wide atomic step (recount tiers, assign rank
//! positions, mark completed). Shared by the finalize endpoint and the Phase 2
//! worker's natural completion.

use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::RankingRun;
use crate::ranking::store::{FinalizeOutcome, RunStore};

pub async fn finalize_run(store: &dyn RunStore, run_id: Uuid) -> Result<RankingRun, AppError> {
    match store.finalize(run_id).await {
        Ok(FinalizeOutcome::Finalized(run)) => {
            info!(
                run_id = %run_id,
                total = run.total_records,
                removal = run.tier_counts.definite_remove_count + run.tier_counts.likely_remove_count,
                "Run finalized"
            );
            Ok(run)
        }
        Ok(FinalizeOutcome::AlreadyCompleted(run)) => Ok(run),
        Ok(FinalizeOutcome::NotFinalizable(status)) => Err(AppError::Conflict(format!(
            "Run cannot be finalized from status {status}"
        ))),
        Err(AppError::NotFound(message)) => Err(AppError::NotFound(message)),
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Finalization failed");
            store
                .mark_failed(run_id, &format!("Finalization failed: {e}"))
                .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::connection::ImportedConnection;
    use crate::models::criteria::{ProtectedKeywords, QualificationCriteria};
    use crate::models::run::{NewRun, RunStatus};
    use crate::models::scored::{ScoredConnection, Tier};
    use crate::ranking::memory_store::InMemoryRunStore;
    use crate::results::query::fixtures::scored;

    async fn phase1_complete(store: &InMemoryRunStore, totals: &[(f64, Tier)]) -> RankingRun {
        let run = store
            .create_run(
                NewRun {
                    owner_id: Uuid::new_v4(),
                    name: "finalize".to_string(),
                    criteria: QualificationCriteria {
                        target_titles: vec!["CTO".to_string()],
                        ..Default::default()
                    },
                    protected_keywords: ProtectedKeywords::default(),
                },
                vec![ImportedConnection::default(); totals.len()],
            )
            .await
            .unwrap();
        let rows: Vec<ScoredConnection> = totals
            .iter()
            .enumerate()
            .map(|(i, (total, tier))| scored(run.id, i as i32, "Ann Lee", *total, *tier))
            .collect();
        store
            .compare_and_set_status(run.id, RunStatus::Pending, RunStatus::Phase1Running)
            .await
            .unwrap();
        store.record_phase1_chunk(run.id, &rows).await.unwrap();
        store.complete_phase1(run.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let store = InMemoryRunStore::new();
        let run = phase1_complete(
            &store,
            &[
                (5.0, Tier::LikelyRemove),
                (60.0, Tier::DefiniteKeep),
                (60.0, Tier::DefiniteKeep),
                (-20.0, Tier::DefiniteRemove),
            ],
        )
        .await;

        let first = finalize_run(&store, run.id).await.unwrap();
        let ranks_first: Vec<Option<i64>> = store
            .export_rows(run.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.rank_position)
            .collect();

        let second = finalize_run(&store, run.id).await.unwrap();
        let ranks_second: Vec<Option<i64>> = store
            .export_rows(run.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.rank_position)
            .collect();

        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.tier_counts, first.tier_counts);
        assert_eq!(ranks_first, ranks_second);
        assert_eq!(ranks_first, vec![Some(1), Some(2), Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn test_ties_rank_in_import_order() {
        let store = InMemoryRunStore::new();
        let run = phase1_complete(
            &store,
            &[(60.0, Tier::DefiniteKeep), (60.0, Tier::DefiniteKeep)],
        )
        .await;
        finalize_run(&store, run.id).await.unwrap();
        let rows = store.export_rows(run.id).await.unwrap();
        assert_eq!(rows[0].connection.row_index, 0);
        assert_eq!(rows[0].rank_position, Some(1));
        assert_eq!(rows[1].rank_position, Some(2));
    }

    #[tokio::test]
    async fn test_finalize_rejected_while_enriching() {
        let store = InMemoryRunStore::new();
        let run = phase1_complete(&store, &[(15.0, Tier::Borderline)]).await;
        store
            .compare_and_set_status(run.id, RunStatus::Phase1Complete, RunStatus::Phase2Running)
            .await
            .unwrap();
        let err = finalize_run(&store, run.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finalize_unknown_run_is_not_found() {
        let store = InMemoryRunStore::new();
        let err = finalize_run(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
