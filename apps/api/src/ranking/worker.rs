//! Phase 2 Enrichment Worker.
//!
//! Claims gray-zone records in batches and enriches them one at a time.
//! Every result is persisted before the next call, so a pause (or a crash)
//! loses at most the in-flight record, which is requeued on resume.
//!
//! Pause is cooperative: the worker checks its `CancellationToken` and the
//! persisted run status before each record and between batches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::criteria::QualificationCriteria;
use crate::models::run::{RankingRun, RunStatus};
use crate::models::scored::{EnrichmentStatus, ScoredConnection};
use crate::ranking::enrichment::{outcome_for, Enricher, EnrichmentRequestRecord};
use crate::ranking::finalize::finalize_run;
use crate::ranking::scorer::ScoringConfig;
use crate::ranking::state_machine::transition;
use crate::ranking::store::{EnrichmentUpdate, RunStore};
use crate::ranking::tiers::{assign_tier, TierThresholds};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: i64,
    pub cost_per_call: f64,
    /// Claims older than this are treated as orphaned and requeued.
    pub claim_timeout: chrono::Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cost_per_call: 0.02,
            claim_timeout: chrono::Duration::seconds(300),
        }
    }
}

/// Counters for one worker session. The persisted run counters are the
/// cumulative view across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerProgress {
    pub processed: i64,
    pub calls: i64,
    pub failed: i64,
    pub cost: f64,
}

impl WorkerProgress {
    fn record(&mut self, failed: bool, cost_per_call: f64) {
        self.processed += 1;
        self.calls += 1;
        if failed {
            self.failed += 1;
        }
        self.cost = self.calls as f64 * cost_per_call;
    }
}

#[derive(Debug)]
pub enum WorkerExit {
    Completed(RankingRun),
    Paused,
    /// The persisted status left `phase2_running` without a local pause.
    Stopped(Option<RunStatus>),
    /// No claimable records remain but other workers still hold claims.
    Yielded { in_flight: i64 },
}

pub struct EnrichmentWorker {
    store: Arc<dyn RunStore>,
    enricher: Arc<dyn Enricher>,
    thresholds: TierThresholds,
    scoring: ScoringConfig,
    settings: WorkerSettings,
}

impl EnrichmentWorker {
    pub fn new(
        store: Arc<dyn RunStore>,
        enricher: Arc<dyn Enricher>,
        thresholds: TierThresholds,
        scoring: ScoringConfig,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            enricher,
            thresholds,
            scoring,
            settings,
        }
    }

    /// Drives the run until it completes, pauses or is stopped elsewhere.
    /// The run must already be `phase2_running`.
    pub async fn run(
        &self,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<(WorkerExit, WorkerProgress), AppError> {
        let mut progress = WorkerProgress::default();

        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
        let criteria = run.criteria.0.clone();

        let requeued = self
            .store
            .requeue_stale_claims(run_id, Utc::now() - self.settings.claim_timeout)
            .await?;
        if requeued > 0 {
            warn!(run_id = %run_id, requeued, "Requeued stale enrichment claims");
        }

        info!(
            run_id = %run_id,
            processed = run.phase2_processed,
            total = run.phase2_total,
            "Enrichment worker started"
        );

        loop {
            if let Some(exit) = self.check_stop(run_id, &cancel, &[]).await? {
                return Ok((exit, progress));
            }

            let batch = self
                .store
                .claim_pending(run_id, self.settings.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            debug!(run_id = %run_id, claimed = batch.len(), "Claimed enrichment batch");

            for (i, row) in batch.iter().enumerate() {
                if let Some(exit) = self.check_stop(run_id, &cancel, &batch[i..]).await? {
                    return Ok((exit, progress));
                }
                self.enrich_one(run_id, row, &criteria, &mut progress).await?;
            }

            info!(
                run_id = %run_id,
                processed = progress.processed,
                calls = progress.calls,
                failed = progress.failed,
                cost = progress.cost,
                "Enrichment batch complete"
            );
        }

        let in_flight = self.store.in_flight_count(run_id).await?;
        if in_flight > 0 {
            info!(run_id = %run_id, in_flight, "Other workers hold claims; exiting without completing");
            return Ok((WorkerExit::Yielded { in_flight }, progress));
        }

        match transition(
            self.store.as_ref(),
            run_id,
            RunStatus::Phase2Running,
            RunStatus::Phase2Complete,
        )
        .await
        {
            Ok(()) => {}
            // Paused or completed by someone else between the last claim and now.
            Err(AppError::Conflict(_)) => {
                let status = self.store.get_run(run_id).await?.map(|r| r.status);
                return Ok((WorkerExit::Stopped(status), progress));
            }
            Err(e) => return Err(e),
        }

        let run = finalize_run(self.store.as_ref(), run_id).await?;
        info!(
            run_id = %run_id,
            calls = run.phase2_calls,
            failed = run.phase2_failed,
            cost = run.phase2_cost,
            "Phase 2 complete"
        );
        Ok((WorkerExit::Completed(run), progress))
    }

    /// Returns an exit when the worker must stop, after releasing `unprocessed`.
    async fn check_stop(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
        unprocessed: &[ScoredConnection],
    ) -> Result<Option<WorkerExit>, AppError> {
        let status = if cancel.is_cancelled() {
            None
        } else {
            match self.store.get_run(run_id).await?.map(|r| r.status) {
                Some(RunStatus::Phase2Running) => return Ok(None),
                other => Some(other),
            }
        };

        let ids: Vec<Uuid> = unprocessed.iter().map(|r| r.connection.id).collect();
        self.store.release_claims(run_id, &ids).await?;

        match status {
            // The pause request persisted `paused` before signalling. A resume
            // may already have moved the run on, so the status is left alone.
            None => {
                info!(run_id = %run_id, released = ids.len(), "Enrichment paused");
                Ok(Some(WorkerExit::Paused))
            }
            Some(Some(RunStatus::Paused)) => {
                info!(run_id = %run_id, released = ids.len(), "Run paused by another session");
                Ok(Some(WorkerExit::Paused))
            }
            Some(other) => {
                warn!(run_id = %run_id, status = ?other, "Run left phase2_running; worker stopping");
                Ok(Some(WorkerExit::Stopped(other)))
            }
        }
    }

    async fn enrich_one(
        &self,
        run_id: Uuid,
        row: &ScoredConnection,
        criteria: &QualificationCriteria,
        progress: &mut WorkerProgress,
    ) -> Result<(), AppError> {
        let record = EnrichmentRequestRecord::from(row);
        let id = record.id;
        let response = self.enricher.enrich(&[record], criteria).await;

        let update = match outcome_for(id, response) {
            Ok(result) => {
                let ai_score = result.ai_score.clamp(self.scoring.ai_min, self.scoring.ai_max);
                let total = row.deterministic_score() + ai_score;
                EnrichmentUpdate {
                    status: EnrichmentStatus::Done,
                    ai_score: Some(ai_score),
                    total_score: total,
                    tier: assign_tier(total, row.is_protected, &self.thresholds),
                    geography: result.geography,
                    industry: result.industry,
                    company_size: result.company_size,
                    reasoning: result.reasoning,
                    error: None,
                }
            }
            Err(message) => {
                warn!(run_id = %run_id, connection_id = %id, error = %message, "Enrichment failed for record");
                EnrichmentUpdate {
                    status: EnrichmentStatus::Failed,
                    ai_score: None,
                    total_score: row.total_score,
                    tier: row.tier,
                    geography: None,
                    industry: None,
                    company_size: None,
                    reasoning: None,
                    error: Some(message),
                }
            }
        };

        let failed = update.status == EnrichmentStatus::Failed;
        let counted = self
            .store
            .record_enrichment(run_id, id, &update, self.settings.cost_per_call)
            .await?;
        if counted {
            progress.record(failed, self.settings.cost_per_call);
        } else {
            warn!(
                run_id = %run_id,
                connection_id = %id,
                "Record no longer claimed; paid call not counted toward cost"
            );
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// WorkerRegistry: at most one local worker per run
// ────────────────────────────────────────────────────────────────────────────

struct Slot {
    token: CancellationToken,
    /// A resume arrived while the paused worker was finishing its last call.
    relaunch: bool,
}

pub enum Registration {
    /// No local worker exists; spawn one with this token.
    Started(CancellationToken),
    /// The paused worker relaunches itself once its in-flight call returns.
    Queued,
}

#[derive(Clone, Default)]
pub struct WorkerRegistry {
    slots: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `commit` (typically the status transition into `phase2_running`)
    /// and registers a worker for `run_id`, both under the registry lock.
    /// Conflicts without running `commit` when a live worker already exists.
    pub async fn register_with<F>(&self, run_id: Uuid, commit: F) -> Result<Registration, AppError>
    where
        F: Future<Output = Result<(), AppError>>,
    {
        let mut slots = self.slots.lock().await;
        let winding_down = match slots.get(&run_id) {
            None => false,
            Some(slot) if slot.token.is_cancelled() && !slot.relaunch => true,
            Some(_) => {
                return Err(AppError::Conflict(
                    "Enrichment is already running for this run".to_string(),
                ))
            }
        };

        commit.await?;

        if winding_down {
            if let Some(slot) = slots.get_mut(&run_id) {
                slot.relaunch = true;
            }
            return Ok(Registration::Queued);
        }
        let token = CancellationToken::new();
        slots.insert(
            run_id,
            Slot {
                token: token.clone(),
                relaunch: false,
            },
        );
        Ok(Registration::Started(token))
    }

    /// Signals the local worker, if any, to pause. Returns whether one was running.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        match self.slots.lock().await.get_mut(&run_id) {
            Some(slot) => {
                slot.token.cancel();
                slot.relaunch = false;
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, run_id: Uuid) -> bool {
        self.slots.lock().await.contains_key(&run_id)
    }

    /// Called when a worker exits. Returns a fresh token if the run was resumed
    /// meanwhile, otherwise drops the registration.
    async fn finish(&self, run_id: Uuid) -> Option<CancellationToken> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&run_id) {
            if slot.relaunch {
                let token = CancellationToken::new();
                slot.token = token.clone();
                slot.relaunch = false;
                return Some(token);
            }
        }
        slots.remove(&run_id);
        None
    }
}

/// Drives `run_id` in the background with an already registered `token`,
/// relaunching in the same task when a resume lands during wind-down.
pub fn spawn_worker(
    worker: Arc<EnrichmentWorker>,
    registry: WorkerRegistry,
    run_id: Uuid,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut token = token;
        loop {
            match worker.run(run_id, token).await {
                Ok((exit, progress)) => log_exit(run_id, &exit, &progress),
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Enrichment worker failed");
                    if let Err(mark_err) = worker.store.mark_failed(run_id, &e.to_string()).await {
                        error!(run_id = %run_id, error = %mark_err, "Failed to mark run failed");
                    }
                }
            }
            match registry.finish(run_id).await {
                Some(next) => {
                    info!(run_id = %run_id, "Run resumed during wind-down; relaunching worker");
                    token = next;
                }
                None => break,
            }
        }
    })
}

fn log_exit(run_id: Uuid, exit: &WorkerExit, progress: &WorkerProgress) {
    let WorkerProgress {
        processed,
        calls,
        failed,
        cost,
    } = *progress;
    match exit {
        WorkerExit::Completed(run) => {
            info!(run_id = %run_id, status = %run.status, processed, calls, failed, cost, "Enrichment worker completed the run");
        }
        WorkerExit::Paused => {
            info!(run_id = %run_id, processed, calls, failed, cost, "Enrichment worker paused");
        }
        WorkerExit::Stopped(Some(status)) => {
            warn!(run_id = %run_id, status = %status, processed, calls, "Enrichment worker stopped");
        }
        WorkerExit::Stopped(None) => {
            warn!(run_id = %run_id, processed, calls, "Enrichment worker stopped; run no longer exists");
        }
        WorkerExit::Yielded { in_flight } => {
            info!(run_id = %run_id, in_flight = *in_flight, processed, "Enrichment worker yielded to other claims");
        }
    }
}
