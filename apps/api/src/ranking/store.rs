//! Results store: persistence seam for runs and scored connections.
//!
//! `AppState` holds an `Arc<dyn RunStore>`. `PgRunStore` is the production
//! backend; `InMemoryRunStore` (see `memory_store`) serves local runs without a
//! database and the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::connection::{Connection, ImportedConnection};
use crate::models::run::{NewRun, RankingRun, RunStatus, TierCounts};
use crate::models::scored::{EnrichmentStatus, ScoredConnection, Tier, UserOverride};
use crate::results::query::{ConnectionPage, ConnectionQuery, SortKey};

/// Statuses from which a run may be marked failed.
pub const FAILABLE_STATUSES: [RunStatus; 4] = [
    RunStatus::Phase1Running,
    RunStatus::Phase2Running,
    RunStatus::Paused,
    RunStatus::Phase2Complete,
];

/// Result of one enrichment call, ready to persist on the record.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentUpdate {
    /// `Done` or `Failed`.
    pub status: EnrichmentStatus,
    pub ai_score: Option<f64>,
    pub total_score: f64,
    pub tier: Tier,
    pub geography: Option<String>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub reasoning: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Finalized(RankingRun),
    /// Finalize on a completed run is a no-op.
    AlreadyCompleted(RankingRun),
    NotFinalizable(RunStatus),
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Creates a `pending` run and persists its imported connections.
    async fn create_run(
        &self,
        new_run: NewRun,
        connections: Vec<ImportedConnection>,
    ) -> Result<RankingRun, AppError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RankingRun>, AppError>;

    /// Runs owned by `owner_id`, newest first.
    async fn list_runs(&self, owner_id: Uuid) -> Result<Vec<RankingRun>, AppError>;

    /// Deletes a run with its connections and scored rows.
    async fn delete_run(&self, run_id: Uuid) -> Result<bool, AppError>;

    async fn compare_and_set_status(
        &self,
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, AppError>;

    /// Moves a running run to `failed` with a message. Returns false when the run
    /// was not in a failable status.
    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<bool, AppError>;

    /// Connections in import order.
    async fn load_connections(&self, run_id: Uuid) -> Result<Vec<Connection>, AppError>;

    /// Persists one Phase 1 chunk, then advances processed and tier counters.
    async fn record_phase1_chunk(
        &self,
        run_id: Uuid,
        rows: &[ScoredConnection],
    ) -> Result<(), AppError>;

    /// Recomputes tier counts and gray-zone size from the rows and moves the run
    /// `phase1_running → phase1_complete` in one step.
    async fn complete_phase1(&self, run_id: Uuid) -> Result<RankingRun, AppError>;

    /// Returns `processing` rows claimed before `older_than` to `pending`.
    async fn requeue_stale_claims(
        &self,
        run_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Claims up to `limit` pending gray-zone rows by marking them `processing`.
    async fn claim_pending(
        &self,
        run_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredConnection>, AppError>;

    /// Returns claimed rows that were never dispatched to `pending`.
    async fn release_claims(&self, run_id: Uuid, connection_ids: &[Uuid]) -> Result<(), AppError>;

    /// Rows currently claimed by some worker.
    async fn in_flight_count(&self, run_id: Uuid) -> Result<i64, AppError>;

    /// Persists one enrichment result and advances the Phase 2 counters.
    /// Counters move only if the row was still `processing`; returns whether they did.
    async fn record_enrichment(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        update: &EnrichmentUpdate,
        cost_per_call: f64,
    ) -> Result<bool, AppError>;

    /// Atomically recounts tiers, assigns rank positions and completes the run.
    async fn finalize(&self, run_id: Uuid) -> Result<FinalizeOutcome, AppError>;

    async fn query_connections(
        &self,
        run_id: Uuid,
        query: &ConnectionQuery,
    ) -> Result<ConnectionPage, AppError>;

    /// Every scored row of the run in rank order.
    async fn export_rows(&self, run_id: Uuid) -> Result<Vec<ScoredConnection>, AppError>;

    async fn set_override(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        value: Option<UserOverride>,
    ) -> Result<bool, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres backend
// ────────────────────────────────────────────────────────────────────────────

const SCORED_SELECT: &str = r#"
    SELECT c.*,
           s.title_score, s.company_score, s.recency_score, s.ai_score,
           s.total_score, s.tier, s.is_protected, s.protected_reason,
           s.enrichment_status, s.geography, s.industry, s.company_size,
           s.ai_reasoning, s.enrichment_error, s.claimed_at, s.user_override,
           s.rank_position
    FROM scored_connections s
    JOIN connections c ON c.id = s.connection_id
"#;

/// Postgres rows are inserted in slices so a bind list never exceeds the
/// 65535-parameter protocol limit.
const INSERT_SLICE: usize = 1000;

#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_run<'e, E>(executor: E, run_id: Uuid) -> Result<Option<RankingRun>, AppError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        Ok(
            sqlx::query_as::<_, RankingRun>("SELECT * FROM ranking_runs WHERE id = $1")
                .bind(run_id)
                .fetch_optional(executor)
                .await?,
        )
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, run_id: Uuid, query: &ConnectionQuery) {
        builder.push(" WHERE s.run_id = ").push_bind(run_id);
        if let Some(tier) = query.tier {
            builder.push(" AND s.tier = ").push_bind(tier.as_str());
        }
        if let Some(term) = query.search_term() {
            let pattern = format!("%{}%", escape_like(&term));
            builder
                .push(" AND (LOWER(c.first_name || ' ' || c.last_name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(c.company) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(c.position) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(
        &self,
        new_run: NewRun,
        connections: Vec<ImportedConnection>,
    ) -> Result<RankingRun, AppError> {
        let run = RankingRun::new(new_run, connections.len() as i64);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ranking_runs
                (id, owner_id, name, status, criteria, protected_keywords, total_records,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(run.id)
        .bind(run.owner_id)
        .bind(&run.name)
        .bind(run.status)
        .bind(&run.criteria)
        .bind(&run.protected_keywords)
        .bind(run.total_records)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        let rows: Vec<Connection> = connections
            .into_iter()
            .enumerate()
            .map(|(i, c)| Connection::from_imported(run.id, i as i32, c))
            .collect();

        for slice in rows.chunks(INSERT_SLICE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO connections (id, run_id, row_index, first_name, last_name, url, \
                 email, company, position, connected_on) ",
            );
            builder.push_values(slice, |mut b, c| {
                b.push_bind(c.id)
                    .push_bind(c.run_id)
                    .push_bind(c.row_index)
                    .push_bind(&c.first_name)
                    .push_bind(&c.last_name)
                    .push_bind(&c.url)
                    .push_bind(&c.email)
                    .push_bind(&c.company)
                    .push_bind(&c.position)
                    .push_bind(&c.connected_on);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RankingRun>, AppError> {
        Self::fetch_run(&self.pool, run_id).await
    }

    async fn list_runs(&self, owner_id: Uuid) -> Result<Vec<RankingRun>, AppError> {
        Ok(sqlx::query_as::<_, RankingRun>(
            "SELECT * FROM ranking_runs WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool, AppError> {
        // connections and scored_connections cascade
        let result = sqlx::query("DELETE FROM ranking_runs WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn compare_and_set_status(
        &self,
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ranking_runs
            SET status = $3,
                updated_at = NOW(),
                phase2_completed_at = CASE WHEN $3 = 'phase2_complete' THEN NOW()
                                           ELSE phase2_completed_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(run_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<bool, AppError> {
        let failable: Vec<&str> = FAILABLE_STATUSES.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            r#"
            UPDATE ranking_runs
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(run_id)
        .bind(message)
        .bind(&failable)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_connections(&self, run_id: Uuid) -> Result<Vec<Connection>, AppError> {
        Ok(sqlx::query_as::<_, Connection>(
            "SELECT * FROM connections WHERE run_id = $1 ORDER BY row_index",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_phase1_chunk(
        &self,
        run_id: Uuid,
        rows: &[ScoredConnection],
    ) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        for slice in rows.chunks(INSERT_SLICE / 2) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO scored_connections (connection_id, run_id, title_score, \
                 company_score, recency_score, total_score, tier, is_protected, \
                 protected_reason, enrichment_status) ",
            );
            builder.push_values(slice, |mut b, r| {
                b.push_bind(r.connection.id)
                    .push_bind(run_id)
                    .push_bind(r.title_score)
                    .push_bind(r.company_score)
                    .push_bind(r.recency_score)
                    .push_bind(r.total_score)
                    .push_bind(r.tier)
                    .push_bind(r.is_protected)
                    .push_bind(&r.protected_reason)
                    .push_bind(r.enrichment_status);
            });
            builder.build().execute(&mut *tx).await?;
        }

        // Counters follow the rows inside the same transaction.
        let delta = TierCounts::from_tiers(rows.iter().map(|r| r.tier));
        sqlx::query(
            r#"
            UPDATE ranking_runs
            SET phase1_processed = phase1_processed + $2,
                protected_count = protected_count + $3,
                definite_remove_count = definite_remove_count + $4,
                likely_remove_count = likely_remove_count + $5,
                borderline_count = borderline_count + $6,
                strong_keep_count = strong_keep_count + $7,
                definite_keep_count = definite_keep_count + $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(rows.len() as i64)
        .bind(delta.protected_count)
        .bind(delta.definite_remove_count)
        .bind(delta.likely_remove_count)
        .bind(delta.borderline_count)
        .bind(delta.strong_keep_count)
        .bind(delta.definite_keep_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn complete_phase1(&self, run_id: Uuid) -> Result<RankingRun, AppError> {
        let mut tx = self.pool.begin().await?;
        let counts = recount_tiers(&mut tx, run_id).await?;

        let updated = sqlx::query_as::<_, RankingRun>(
            r#"
            UPDATE ranking_runs
            SET status = 'phase1_complete',
                protected_count = $2,
                definite_remove_count = $3,
                likely_remove_count = $4,
                borderline_count = $5,
                strong_keep_count = $6,
                definite_keep_count = $7,
                phase2_total = $5,
                phase1_completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'phase1_running'
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(counts.protected_count)
        .bind(counts.definite_remove_count)
        .bind(counts.likely_remove_count)
        .bind(counts.borderline_count)
        .bind(counts.strong_keep_count)
        .bind(counts.definite_keep_count)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Conflict(format!("Run {run_id} is not in phase1_running")))?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn requeue_stale_claims(
        &self,
        run_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scored_connections
            SET enrichment_status = 'pending', claimed_at = NULL
            WHERE run_id = $1 AND enrichment_status = 'processing' AND claimed_at < $2
            "#,
        )
        .bind(run_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_pending(
        &self,
        run_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredConnection>, AppError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE scored_connections
            SET enrichment_status = 'processing', claimed_at = NOW()
            WHERE connection_id IN (
                SELECT s.connection_id
                FROM scored_connections s
                JOIN connections c ON c.id = s.connection_id
                WHERE s.run_id = $1 AND s.enrichment_status = 'pending'
                ORDER BY c.row_index
                LIMIT $2
                FOR UPDATE OF s SKIP LOCKED
            )
            RETURNING connection_id
            "#,
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let claimed = sqlx::query_as::<_, ScoredConnection>(&format!(
            "{SCORED_SELECT} WHERE s.connection_id = ANY($1) ORDER BY c.row_index"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claimed)
    }

    async fn release_claims(&self, run_id: Uuid, connection_ids: &[Uuid]) -> Result<(), AppError> {
        if connection_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE scored_connections
            SET enrichment_status = 'pending', claimed_at = NULL
            WHERE run_id = $1 AND connection_id = ANY($2) AND enrichment_status = 'processing'
            "#,
        )
        .bind(run_id)
        .bind(connection_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn in_flight_count(&self, run_id: Uuid) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM scored_connections WHERE run_id = $1 AND enrichment_status = 'processing'",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn record_enrichment(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        update: &EnrichmentUpdate,
        cost_per_call: f64,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE scored_connections
            SET enrichment_status = $3,
                ai_score = $4,
                total_score = $5,
                tier = $6,
                geography = $7,
                industry = $8,
                company_size = $9,
                ai_reasoning = $10,
                enrichment_error = $11,
                claimed_at = NULL
            WHERE run_id = $1 AND connection_id = $2 AND enrichment_status = 'processing'
            "#,
        )
        .bind(run_id)
        .bind(connection_id)
        .bind(update.status)
        .bind(update.ai_score)
        .bind(update.total_score)
        .bind(update.tier)
        .bind(&update.geography)
        .bind(&update.industry)
        .bind(&update.company_size)
        .bind(&update.reasoning)
        .bind(&update.error)
        .execute(&mut *tx)
        .await?;

        if row.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let failed_delta: i64 = if update.status == EnrichmentStatus::Failed { 1 } else { 0 };
        sqlx::query(
            r#"
            UPDATE ranking_runs
            SET phase2_processed = phase2_processed + 1,
                phase2_calls = phase2_calls + 1,
                phase2_failed = phase2_failed + $2,
                phase2_cost = (phase2_calls + 1) * $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(failed_delta)
        .bind(cost_per_call)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finalize(&self, run_id: Uuid) -> Result<FinalizeOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<RunStatus> =
            sqlx::query_scalar("SELECT status FROM ranking_runs WHERE id = $1 FOR UPDATE")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status = status.ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;

        match status {
            RunStatus::Phase1Complete | RunStatus::Phase2Complete => {}
            RunStatus::Completed => {
                tx.rollback().await?;
                let run = Self::fetch_run(&self.pool, run_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
                return Ok(FinalizeOutcome::AlreadyCompleted(run));
            }
            other => {
                tx.rollback().await?;
                return Ok(FinalizeOutcome::NotFinalizable(other));
            }
        }

        let counts = recount_tiers(&mut tx, run_id).await?;

        sqlx::query(
            r#"
            UPDATE scored_connections s
            SET rank_position = ranked.position
            FROM (
                SELECT s2.connection_id,
                       ROW_NUMBER() OVER (ORDER BY s2.total_score DESC, c.row_index ASC) AS position
                FROM scored_connections s2
                JOIN connections c ON c.id = s2.connection_id
                WHERE s2.run_id = $1
            ) ranked
            WHERE s.connection_id = ranked.connection_id
            "#,
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        let run = sqlx::query_as::<_, RankingRun>(
            r#"
            UPDATE ranking_runs
            SET status = 'completed',
                protected_count = $2,
                definite_remove_count = $3,
                likely_remove_count = $4,
                borderline_count = $5,
                strong_keep_count = $6,
                definite_keep_count = $7,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(counts.protected_count)
        .bind(counts.definite_remove_count)
        .bind(counts.likely_remove_count)
        .bind(counts.borderline_count)
        .bind(counts.strong_keep_count)
        .bind(counts.definite_keep_count)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized(run))
    }

    async fn query_connections(
        &self,
        run_id: Uuid,
        query: &ConnectionQuery,
    ) -> Result<ConnectionPage, AppError> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM scored_connections s JOIN connections c ON c.id = s.connection_id",
        );
        Self::push_filters(&mut count, run_id, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Postgres> = QueryBuilder::new(SCORED_SELECT);
        Self::push_filters(&mut select, run_id, query);
        select.push(match query.sort {
            SortKey::Rank => {
                " ORDER BY s.rank_position ASC NULLS LAST, s.total_score DESC, c.row_index ASC"
            }
            SortKey::Score => " ORDER BY s.total_score DESC, c.row_index ASC",
        });
        select
            .push(" LIMIT ")
            .push_bind(query.page_size() as i64)
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let items = select
            .build_query_as::<ScoredConnection>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ConnectionPage {
            items,
            total: total as u64,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn export_rows(&self, run_id: Uuid) -> Result<Vec<ScoredConnection>, AppError> {
        Ok(sqlx::query_as::<_, ScoredConnection>(&format!(
            "{SCORED_SELECT} WHERE s.run_id = $1 \
             ORDER BY s.rank_position ASC NULLS LAST, s.total_score DESC, c.row_index ASC"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn set_override(
        &self,
        run_id: Uuid,
        connection_id: Uuid,
        value: Option<UserOverride>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE scored_connections SET user_override = $3 WHERE run_id = $1 AND connection_id = $2",
        )
        .bind(run_id)
        .bind(connection_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

async fn recount_tiers(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    run_id: Uuid,
) -> Result<TierCounts, AppError> {
    let rows: Vec<(Tier, i64)> = sqlx::query_as(
        "SELECT tier, COUNT(*) FROM scored_connections WHERE run_id = $1 GROUP BY tier",
    )
    .bind(run_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut counts = TierCounts::default();
    for (tier, n) in rows {
        counts.add(tier, n);
    }
    Ok(counts)
}
