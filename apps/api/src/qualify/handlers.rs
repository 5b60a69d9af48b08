use axum::{extract::State, Json};
use serde::Deserialize;

use crate::errors::AppError;
use crate::import::csv::parse_connections;
use crate::models::connection::ImportedConnection;
use crate::models::criteria::QualificationCriteria;
use crate::qualify::pipeline::{qualify, QualifyOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct QualifyRequest {
    pub criteria: QualificationCriteria,
    #[serde(default)]
    pub connections: Vec<ImportedConnection>,
    /// Raw contact export; parsed server-side when `connections` is empty.
    #[serde(default)]
    pub csv: Option<String>,
}

/// POST /api/v1/qualify
pub async fn handle_qualify(
    State(state): State<AppState>,
    Json(req): Json<QualifyRequest>,
) -> Result<Json<QualifyOutcome>, AppError> {
    if !req.criteria.is_set() {
        return Err(AppError::Validation(
            "Qualification criteria must include a target title, industry, or description"
                .to_string(),
        ));
    }
    let connections = match (req.connections.is_empty(), req.csv) {
        (true, Some(csv)) => parse_connections(&csv)?.connections,
        _ => req.connections,
    };
    if connections.is_empty() {
        return Err(AppError::Validation("No connections to qualify".to_string()));
    }

    let outcome = qualify(
        state.classifier.as_ref(),
        connections,
        &req.criteria,
        state.config.qualifier_batch_size,
    )
    .await;
    Ok(Json(outcome))
}
