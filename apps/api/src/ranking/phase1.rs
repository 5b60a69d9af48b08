//! Phase 1 Orchestrator: scores every connection of a run in chunks and
//! persists the results, then opens the Phase 1 review.

use chrono::{NaiveDate, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::connection::Connection;
use crate::models::run::RankingRun;
use crate::models::scored::{EnrichmentStatus, ScoredConnection};
use crate::ranking::scorer::{score, ScoreBreakdown, ScoringConfig};
use crate::ranking::store::RunStore;
use crate::ranking::tiers::{assign_tier, TierThresholds};

#[derive(Debug, Clone)]
pub struct Phase1Settings {
    pub chunk_size: usize,
    pub scoring: ScoringConfig,
    pub thresholds: TierThresholds,
}

impl Default for Phase1Settings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            scoring: ScoringConfig::default(),
            thresholds: TierThresholds::default(),
        }
    }
}

/// Scores a `phase1_running` run and moves it to `phase1_complete`.
/// Any error marks the run failed before it is returned.
pub async fn run_phase1(
    store: &dyn RunStore,
    run_id: Uuid,
    settings: &Phase1Settings,
) -> Result<RankingRun, AppError> {
    let today = Utc::now().date_naive();
    match score_run(store, run_id, settings, today).await {
        Ok(run) => Ok(run),
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Phase 1 failed");
            store
                .mark_failed(run_id, &format!("Phase 1 failed: {e}"))
                .await?;
            Err(e)
        }
    }
}

async fn score_run(
    store: &dyn RunStore,
    run_id: Uuid,
    settings: &Phase1Settings,
    today: NaiveDate,
) -> Result<RankingRun, AppError> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
    let connections = store.load_connections(run_id).await?;
    info!(run_id = %run_id, records = connections.len(), "Phase 1 scoring started");

    let chunk_size = settings.chunk_size.max(1);
    for (i, chunk) in connections.chunks(chunk_size).enumerate() {
        let rows: Vec<ScoredConnection> = chunk
            .iter()
            .map(|c| {
                let breakdown = score(
                    c,
                    &run.criteria.0,
                    &run.protected_keywords.0,
                    &settings.scoring,
                    today,
                );
                scored_row(c.clone(), breakdown, &settings.thresholds)
            })
            .collect();
        store.record_phase1_chunk(run_id, &rows).await?;
        info!(run_id = %run_id, chunk = i + 1, scored = rows.len(), "Phase 1 chunk persisted");
    }

    let run = store.complete_phase1(run_id).await?;
    debug_assert_eq!(
        run.tier_counts.total(),
        run.total_records,
        "tier counts must sum to total records"
    );
    info!(
        run_id = %run_id,
        protected = run.tier_counts.protected_count,
        definite_remove = run.tier_counts.definite_remove_count,
        likely_remove = run.tier_counts.likely_remove_count,
        borderline = run.tier_counts.borderline_count,
        strong_keep = run.tier_counts.strong_keep_count,
        definite_keep = run.tier_counts.definite_keep_count,
        "Phase 1 complete"
    );
    Ok(run)
}

fn scored_row(
    connection: Connection,
    breakdown: ScoreBreakdown,
    thresholds: &TierThresholds,
) -> ScoredConnection {
    let tier = assign_tier(breakdown.total, breakdown.is_protected, thresholds);
    ScoredConnection {
        connection,
        title_score: breakdown.title_score,
        company_score: breakdown.company_score,
        recency_score: breakdown.recency_score,
        ai_score: None,
        total_score: breakdown.total,
        tier,
        is_protected: breakdown.is_protected,
        protected_reason: breakdown.protected_reason,
        enrichment_status: tier.is_gray_zone().then_some(EnrichmentStatus::Pending),
        geography: None,
        industry: None,
        company_size: None,
        ai_reasoning: None,
        enrichment_error: None,
        claimed_at: None,
        user_override: None,
        rank_position: None,
    }
}
