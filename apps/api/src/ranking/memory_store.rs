//! In-process `RunStore` used when no `DATABASE_URL` is configured, and by tests.
//! A single `RwLock` over all state gives every operation, finalize included,
//! the same atomicity the Postgres transactions provide.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::connection::{Connection, ImportedConnection};
use crate::models::run::{NewRun, RankingRun, RunStatus, TierCounts};
use crate::models::scored::{EnrichmentStatus, ScoredConnection, UserOverride};
use crate::ranking::store::{EnrichmentUpdate, FinalizeOutcome, RunStore, FAILABLE_STATUSES};
use crate::results::query::{apply_query, compare_by_rank, compare_by_score, ConnectionPage, ConnectionQuery};

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, RankingRun>,
    connections: HashMap<Uuid, Vec<Connection>>,
    /// Scored rows per run, in import order.
    scored: HashMap<Uuid, Vec<ScoredConnection>>,
}

impl Inner {
    fn run_mut(&mut self, run_id: Uuid) -> Result<&mut RankingRun, AppError> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
    }

    fn recount(&self, run_id: Uuid) -> TierCounts {
        TierCounts::from_tiers(
            self.scored
                .get(&run_id)
                .into_iter()
                .flatten()
                .map(|r| r.tier),
        )
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(
        &self,
        new_run: NewRun,
        connections: Vec<ImportedConnection>,
    ) -> Result<RankingRun, AppError> {
        let run = RankingRun::new(new_run, connections.len() as i64);
        let rows = connections
            .into_iter()
            .enumerate()
            .map(|(i, c)| Connection::from_imported(run.id, i as i32, c))
            .collect();

        let mut inner = self.inner.write().await;
        inner.connections.insert(run.id, rows);
        inner.scored.insert(run.id, Vec::new());
        inner.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RankingRun>, AppError> {
        Ok(self.inner.read().await.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, owner_id: Uuid) -> Result<Vec<RankingRun>, AppError> {
        let inner = self.inner.read().await;
        let mut runs: Vec<RankingRun> = inner
            .runs
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&run_id);
        inner.scored.remove(&run_id);
        Ok(inner.runs.remove(&run_id).is_some())
    }

    async fn compare_and_set_status(
        &self,
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Ok(false);
        };
        if run.status != from {
            return Ok(false);
        }
        let now = Utc::now();
        run.status = to;
        run.updated_at = now;
        if to == RunStatus::Phase2Complete {
            run.phase2_completed_at = Some(now);
        }
        Ok(true)
    }

    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Ok(false);
        };
        if !FAILABLE_STATUSES.contains(&run.status) {
            return Ok(false);
        }
        run.status = RunStatus::Failed;
        run.error_message = Some(message.to_string());
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn load_connections(&self, run_id: Uuid) -> Result<Vec<Connection>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .connections
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_phase1_chunk(
        &self,
        run_id: Uuid,
        rows: &[ScoredConnection],
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.run_mut(run_id)?;
        inner
            .scored
            .entry(run_id)
            .or_default()
            .extend(rows.iter().cloned());

        let delta = TierCounts::from_tiers(rows.iter().map(|r| r.tier));
        let run = inner.run_mut(run_id)?;
        run.phase1_processed += rows.len() as i64;
        for tier in crate::models::scored::Tier::ALL {
            run.tier_counts.add(tier, delta.get(tier));
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_phase1(&self, run_id: Uuid) -> Result<RankingRun, AppError> {
        let mut inner = self.inner.write().await;
        let counts = inner.recount(run_id);
        let run = inner.run_mut(run_id)?;
        if run.status != RunStatus::Phase1Running {
            return Err(AppError::Conflict(format!(
                "Run {run_id} is not in phase1_running"
            )));
        }
        let now = Utc::now();
        run.tier_counts = counts;
        run.phase2_total = counts.borderline_count;
        run.status = RunStatus::Phase1Complete;
        run.phase1_completed_at = Some(now);
        run.updated_at = now;
        Ok(run.clone())
    }

    async fn requeue_stale_claims(
        &self,
        run_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let mut requeued = 0;
        for row in inner.scored.get_mut(&run_id).into_iter().flatten() {
            let stale = row.enrichment_status == Some(EnrichmentStatus::Processing)
                && row.claimed_at.map(|t| t < older_than).unwrap_or(true);
            if stale {
                row.enrichment_status = Some(EnrichmentStatus::Pending);
                row.claimed_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn claim_pending(
        &self,
        run_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredConnection>, AppError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut claimed = Vec::new();
        for row in inner.scored.get_mut(&run_id).into_iter().flatten() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if row.enrichment_status == Some(EnrichmentStatus::Pending) {
                row.enrichment_status = Some(EnrichmentStatus::Processing);
                row.claimed_at = Some(now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_claims(&self, run_id: Uuid, connection_ids: &[Uuid]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        for row in inner.scored.get_mut(&run_id).into_iter().flatten() {
            if row.enrichment_status == Some(EnrichmentStatus::Processing)
                && connection_ids.contains(&row.connection.id)
            {
                row.enrichment_status = Some(EnrichmentStatus::Pending);
                row.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn in_flight_count(&self, run_id: Uuid) -> Result<i64, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .scored
            .get(&run_id)
            .into_iter()
            .flatten()
            .filter(|r| r.enrichment_status == Some(EnrichmentStatus::Processing))
            .count() as i64)
    }

    async fn record_enrichment(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        update: &EnrichmentUpdate,
        cost_per_call: f64,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .scored
            .get_mut(&run_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.connection.id == connection_id));
        let Some(row) = row else {
            return Ok(false);
        };
        if row.enrichment_status != Some(EnrichmentStatus::Processing) {
            return Ok(false);
        }
        row.enrichment_status = Some(update.status);
        row.ai_score = update.ai_score;
        row.total_score = update.total_score;
        row.tier = update.tier;
        row.geography = update.geography.clone();
        row.industry = update.industry.clone();
        row.company_size = update.company_size.clone();
        row.ai_reasoning = update.reasoning.clone();
        row.enrichment_error = update.error.clone();
        row.claimed_at = None;

        let run = inner.run_mut(run_id)?;
        run.phase2_processed += 1;
        run.phase2_calls += 1;
        if update.status == EnrichmentStatus::Failed {
            run.phase2_failed += 1;
        }
        run.phase2_cost = run.phase2_calls as f64 * cost_per_call;
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn finalize(&self, run_id: Uuid) -> Result<FinalizeOutcome, AppError> {
        let mut inner = self.inner.write().await;
        let status = inner.run_mut(run_id)?.status;
        match status {
            RunStatus::Phase1Complete | RunStatus::Phase2Complete => {}
            RunStatus::Completed => {
                return Ok(FinalizeOutcome::AlreadyCompleted(inner.run_mut(run_id)?.clone()))
            }
            other => return Ok(FinalizeOutcome::NotFinalizable(other)),
        }

        let counts = inner.recount(run_id);
        if let Some(rows) = inner.scored.get_mut(&run_id) {
            let mut order: Vec<usize> = (0..rows.len()).collect();
            order.sort_by(|a, b| compare_by_score(&rows[*a], &rows[*b]));
            for (position, idx) in order.into_iter().enumerate() {
                rows[idx].rank_position = Some(position as i64 + 1);
            }
        }

        let now = Utc::now();
        let run = inner.run_mut(run_id)?;
        run.tier_counts = counts;
        run.status = RunStatus::Completed;
        run.completed_at = Some(now);
        run.updated_at = now;
        Ok(FinalizeOutcome::Finalized(run.clone()))
    }

    async fn query_connections(
        &self,
        run_id: Uuid,
        query: &ConnectionQuery,
    ) -> Result<ConnectionPage, AppError> {
        let inner = self.inner.read().await;
        let rows = inner.scored.get(&run_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(apply_query(rows, query))
    }

    async fn export_rows(&self, run_id: Uuid) -> Result<Vec<ScoredConnection>, AppError> {
        let inner = self.inner.read().await;
        let mut rows = inner.scored.get(&run_id).cloned().unwrap_or_default();
        rows.sort_by(compare_by_rank);
        Ok(rows)
    }

    async fn set_override(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        value: Option<UserOverride>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .scored
            .get_mut(&run_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.connection.id == connection_id));
        match row {
            Some(row) => {
                row.user_override = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
