use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A normalized contact record as produced by the import step.
/// Shared by the standard qualifier and the ranking pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportedConnection {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub connected_on: String,
}

impl ImportedConnection {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A connection persisted under a ranking run. Immutable once imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Connection {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Position in the uploaded file; breaks score ties when ranking.
    pub row_index: i32,
    pub first_name: String,
    pub last_name: String,
    pub url: String,
    pub email: String,
    pub company: String,
    pub position: String,
    pub connected_on: String,
}

impl Connection {
    pub fn from_imported(run_id: Uuid, row_index: i32, imported: ImportedConnection) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            row_index,
            first_name: imported.first_name,
            last_name: imported.last_name,
            url: imported.url,
            email: imported.email,
            company: imported.company,
            position: imported.position,
            connected_on: imported.connected_on,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}
