use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::import::csv::parse_connections;
use crate::models::connection::ImportedConnection;
use crate::models::criteria::{ProtectedKeywords, QualificationCriteria};
use crate::models::run::{NewRun, RankingRun, RunStatus};
use crate::ranking::finalize::finalize_run;
use crate::ranking::phase1::run_phase1;
use crate::ranking::state_machine::{check_phase1_entry, check_phase2_entry, transition, ResumeStage};
use crate::ranking::worker::{spawn_worker, Registration};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

/// A run plus the client-facing view derived from it.
#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: RankingRun,
    pub resume_stage: ResumeStage,
    /// Whether this process is currently enriching the run.
    pub worker_active: bool,
}

impl RunDetail {
    async fn build(state: &AppState, run: RankingRun) -> Self {
        let worker_active = state.workers.is_running(run.id).await;
        Self {
            resume_stage: run.status.resume_stage(),
            worker_active,
            run,
        }
    }
}

/// Loads a run, treating a run owned by someone else as missing.
pub async fn load_owned_run(
    state: &AppState,
    run_id: Uuid,
    user_id: Uuid,
) -> Result<RankingRun, AppError> {
    state
        .store
        .get_run(run_id)
        .await?
        .filter(|run| run.owner_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub criteria: QualificationCriteria,
    #[serde(default)]
    pub protected_keywords: ProtectedKeywords,
    #[serde(default)]
    pub connections: Vec<ImportedConnection>,
    /// Raw contact export; parsed server-side when `connections` is empty.
    #[serde(default)]
    pub csv: Option<String>,
}

#[derive(Serialize)]
pub struct CreateRunResponse {
    #[serde(flatten)]
    pub detail: RunDetail,
    pub skipped_rows: usize,
}

/// POST /api/v1/runs
pub async fn handle_create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<CreateRunResponse>), AppError> {
    let (connections, skipped_rows) = match (req.connections.is_empty(), req.csv) {
        (false, _) => (req.connections, 0),
        (true, Some(csv)) => {
            let report = parse_connections(&csv)?;
            (report.connections, report.skipped_rows)
        }
        (true, None) => (Vec::new(), 0),
    };
    if connections.is_empty() {
        return Err(AppError::Validation(
            "A run needs at least one connection".to_string(),
        ));
    }

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Run {}", Utc::now().format("%Y-%m-%d %H:%M")));

    let run = state
        .store
        .create_run(
            NewRun {
                owner_id: req.user_id,
                name,
                criteria: req.criteria,
                protected_keywords: req.protected_keywords,
            },
            connections,
        )
        .await?;
    info!(run_id = %run.id, records = run.total_records, skipped_rows, "Run created");

    let detail = RunDetail::build(&state, run).await;
    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            detail,
            skipped_rows,
        }),
    ))
}

/// GET /api/v1/runs
pub async fn handle_list_runs(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<RunDetail>>, AppError> {
    let runs = state.store.list_runs(params.user_id).await?;
    let mut details = Vec::with_capacity(runs.len());
    for run in runs {
        details.push(RunDetail::build(&state, run).await);
    }
    Ok(Json(details))
}

/// GET /api/v1/runs/:id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<RunDetail>, AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;
    Ok(Json(RunDetail::build(&state, run).await))
}

/// DELETE /api/v1/runs/:id
pub async fn handle_delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    load_owned_run(&state, run_id, params.user_id).await?;
    state.workers.cancel(run_id).await;
    state.store.delete_run(run_id).await?;
    info!(run_id = %run_id, "Run deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/runs/:id/phase1
pub async fn handle_start_phase1(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<(StatusCode, Json<RunDetail>), AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;
    check_phase1_entry(&run)?;
    transition(
        state.store.as_ref(),
        run_id,
        RunStatus::Pending,
        RunStatus::Phase1Running,
    )
    .await?;

    let store = state.store.clone();
    let settings = state.phase1.clone();
    tokio::spawn(async move {
        if let Err(e) = run_phase1(store.as_ref(), run_id, &settings).await {
            warn!(run_id = %run_id, error = %e, "Phase 1 task ended with an error");
        }
    });

    accepted(&state, run_id).await
}

/// POST /api/v1/runs/:id/phase2
pub async fn handle_start_phase2(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<(StatusCode, Json<RunDetail>), AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;
    check_phase2_entry(&run)?;
    launch_worker(&state, run_id, Some(RunStatus::Phase1Complete)).await?;
    accepted(&state, run_id).await
}

/// POST /api/v1/runs/:id/pause
pub async fn handle_pause(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<RunDetail>, AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;
    if run.status == RunStatus::Paused {
        return Ok(Json(RunDetail::build(&state, run).await));
    }
    if run.status != RunStatus::Phase2Running {
        return Err(AppError::Conflict(format!(
            "Only an enriching run can be paused (status: {})",
            run.status
        )));
    }

    // Persist first so a worker in another session also stops.
    let persisted = state
        .store
        .compare_and_set_status(run_id, RunStatus::Phase2Running, RunStatus::Paused)
        .await?;
    let signalled = state.workers.cancel(run_id).await;
    info!(run_id = %run_id, persisted, signalled, "Pause requested");

    let run = load_owned_run(&state, run_id, params.user_id).await?;
    Ok(Json(RunDetail::build(&state, run).await))
}

/// POST /api/v1/runs/:id/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<(StatusCode, Json<RunDetail>), AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;

    match run.status {
        // The worker from before the pause may still be finishing its call;
        // the registry queues this resume behind it.
        RunStatus::Paused => {
            launch_worker(&state, run_id, Some(RunStatus::Paused)).await?;
            accepted(&state, run_id).await
        }
        // Recovery after a restart: the run is enriching but nothing here drives it.
        RunStatus::Phase2Running => {
            launch_worker(&state, run_id, None).await?;
            accepted(&state, run_id).await
        }
        RunStatus::Phase1Running => {
            let stalled_since =
                Utc::now() - chrono::Duration::seconds(state.config.claim_timeout_secs);
            if run.updated_at < stalled_since {
                state
                    .store
                    .mark_failed(run_id, "Phase 1 stalled and cannot be resumed; start a new run")
                    .await?;
                warn!(run_id = %run_id, "Stalled Phase 1 marked failed on resume");
                let run = load_owned_run(&state, run_id, params.user_id).await?;
                Ok((StatusCode::OK, Json(RunDetail::build(&state, run).await)))
            } else {
                Err(AppError::Conflict("Phase 1 is still running".to_string()))
            }
        }
        // Crash between Phase 2 completion and finalization.
        RunStatus::Phase2Complete => {
            let run = finalize_run(state.store.as_ref(), run_id).await?;
            Ok((StatusCode::OK, Json(RunDetail::build(&state, run).await)))
        }
        other => Err(AppError::Conflict(format!(
            "Run cannot be resumed from status {other}"
        ))),
    }
}

/// POST /api/v1/runs/:id/finalize
pub async fn handle_finalize(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<RunDetail>, AppError> {
    load_owned_run(&state, run_id, params.user_id).await?;
    let run = finalize_run(state.store.as_ref(), run_id).await?;
    Ok(Json(RunDetail::build(&state, run).await))
}

/// Moves the run from `from` into `phase2_running` (when given) and attaches a
/// local worker, atomically with respect to other launches and pauses.
async fn launch_worker(
    state: &AppState,
    run_id: Uuid,
    from: Option<RunStatus>,
) -> Result<(), AppError> {
    let store = state.store.clone();
    let commit = async move {
        match from {
            Some(from) => {
                transition(store.as_ref(), run_id, from, RunStatus::Phase2Running).await
            }
            None => Ok(()),
        }
    };
    match state.workers.register_with(run_id, commit).await? {
        Registration::Started(token) => {
            spawn_worker(state.worker.clone(), state.workers.clone(), run_id, token);
        }
        Registration::Queued => {
            info!(run_id = %run_id, "Resume queued behind the pausing worker");
        }
    }
    Ok(())
}

async fn accepted(
    state: &AppState,
    run_id: Uuid,
) -> Result<(StatusCode, Json<RunDetail>), AppError> {
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
    Ok((StatusCode::ACCEPTED, Json(RunDetail::build(state, run).await)))
}
