use axum::{extract::Multipart, Json};
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
use crate::import::csv::{parse_connections, ImportReport};

/// POST /api/v1/import
/// Multipart upload with the export in a `file` field.
pub async fn handle_import_upload(mut multipart: Multipart) -> Result<Json<ImportReport>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);
        let report = parse_connections(&text)?;
        info!(
            imported = report.connections.len(),
            skipped = report.skipped_rows,
            "CSV upload parsed"
        );
        return Ok(Json(report));
    }
    Err(AppError::Validation(
        "Multipart body has no 'file' field".to_string(),
    ))
}

#[derive(Deserialize)]
pub struct ImportTextRequest {
    pub csv: String,
}

/// POST /api/v1/import/text
pub async fn handle_import_text(
    Json(req): Json<ImportTextRequest>,
) -> Result<Json<ImportReport>, AppError> {
    Ok(Json(parse_connections(&req.csv)?))
}
