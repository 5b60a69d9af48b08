use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::scored::{Tier, UserOverride};
use crate::ranking::handlers::{load_owned_run, UserIdQuery};
use crate::results::export::{project, CsvExporter, ExportKind};
use crate::results::query::{ConnectionPage, ConnectionQuery, SortKey};
use crate::state::AppState;

/// Query-string form of `ConnectionQuery`. Spelled out because url-encoded
/// values cannot pass through `#[serde(flatten)]` into numeric fields.
#[derive(Deserialize)]
pub struct ConnectionsParams {
    pub user_id: Uuid,
    pub tier: Option<Tier>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ConnectionsParams {
    fn query(&self) -> ConnectionQuery {
        ConnectionQuery {
            tier: self.tier,
            search: self.search.clone(),
            sort: self.sort,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// GET /api/v1/runs/:id/connections
pub async fn handle_list_connections(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<ConnectionsParams>,
) -> Result<Json<ConnectionPage>, AppError> {
    load_owned_run(&state, run_id, params.user_id).await?;
    let query = params.query();
    query.validate()?;
    let page = state.store.query_connections(run_id, &query).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    /// `null` clears the override.
    pub value: Option<UserOverride>,
}

/// PATCH /api/v1/runs/:id/connections/:cid/override
pub async fn handle_set_override(
    State(state): State<AppState>,
    Path((run_id, connection_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<UserIdQuery>,
    Json(req): Json<OverrideRequest>,
) -> Result<StatusCode, AppError> {
    load_owned_run(&state, run_id, params.user_id).await?;
    if !state
        .store
        .set_override(run_id, connection_id, req.value)
        .await?
    {
        return Err(AppError::NotFound(format!(
            "Connection {connection_id} not found in run {run_id}"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ExportParams {
    pub user_id: Uuid,
    #[serde(default)]
    pub kind: ExportKind,
}

/// GET /api/v1/runs/:id/export
pub async fn handle_export(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    let run = load_owned_run(&state, run_id, params.user_id).await?;
    let rows = state.store.export_rows(run_id).await?;
    let csv = CsvExporter::to_string(project(&rows, params.kind));

    let filename = format!("{}-{}.csv", slug(&run.name), params.kind.as_str());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "run".to_string()
    } else {
        slug
    }
}
