//! Enrichment service seam for Phase 2.
//!
//! `AppState` carries an `Arc<dyn Enricher>`. The production backend is
//! `LlmEnricher` (web-grounded Claude call); tests substitute fakes.
//! Results are correlated by record id, never by position.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::llm_client::prompts::render_criteria;
use crate::llm_client::{LlmClient, ENRICHMENT_MODEL};
use crate::models::criteria::QualificationCriteria;
use crate::models::scored::ScoredConnection;
use crate::ranking::prompts::{ENRICHMENT_PROMPT_TEMPLATE, ENRICHMENT_SYSTEM};
use crate::ranking::scorer::ScoringConfig;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment call failed: {0}")]
    Call(String),
}

/// One record as sent to the enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequestRecord {
    pub id: Uuid,
    pub name: String,
    pub company: String,
    pub title: String,
    pub deterministic_score: f64,
}

impl From<&ScoredConnection> for EnrichmentRequestRecord {
    fn from(row: &ScoredConnection) -> Self {
        Self {
            id: row.connection.id,
            name: row.connection.full_name(),
            company: row.connection.company.clone(),
            title: row.connection.position.clone(),
            deterministic_score: row.deterministic_score(),
        }
    }
}

/// Structured enrichment output for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub ai_score: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub geography: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub company_size: Option<String>,
}

/// Per-record response item: either a result or an error, keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResponseItem {
    pub id: Uuid,
    #[serde(default)]
    pub ai_score: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub geography: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub company_size: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EnrichmentResponseItem {
    pub fn into_outcome(self) -> Result<EnrichmentResult, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.ai_score {
            Some(score) if score.is_finite() => Ok(EnrichmentResult {
                ai_score: score,
                reasoning: self.reasoning,
                geography: self.geography,
                industry: self.industry,
                company_size: self.company_size,
            }),
            _ => Err("Enrichment response missing ai_score".to_string()),
        }
    }
}

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        records: &[EnrichmentRequestRecord],
        criteria: &QualificationCriteria,
    ) -> Result<Vec<EnrichmentResponseItem>, EnrichmentError>;
}

/// Finds the response item for `id`, whatever its position.
pub fn outcome_for(
    id: Uuid,
    response: Result<Vec<EnrichmentResponseItem>, EnrichmentError>,
) -> Result<EnrichmentResult, String> {
    match response {
        Err(e) => Err(e.to_string()),
        Ok(items) => items
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| "Enrichment response had no entry for this record".to_string())
            .and_then(EnrichmentResponseItem::into_outcome),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LlmEnricher: web-grounded Claude backend
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmEnricher {
    llm: LlmClient,
    ai_min: f64,
    ai_max: f64,
}

impl LlmEnricher {
    pub fn new(llm: LlmClient, scoring: &ScoringConfig) -> Self {
        Self {
            llm,
            ai_min: scoring.ai_min,
            ai_max: scoring.ai_max,
        }
    }

    fn build_prompt(
        &self,
        records: &[EnrichmentRequestRecord],
        criteria: &QualificationCriteria,
    ) -> Result<String, EnrichmentError> {
        let records_json = serde_json::to_string_pretty(records)
            .map_err(|e| EnrichmentError::Call(format!("Failed to serialize records: {e}")))?;
        Ok(ENRICHMENT_PROMPT_TEMPLATE
            .replace("{criteria}", &render_criteria(criteria))
            .replace("{records_json}", &records_json)
            .replace("{ai_min}", &self.ai_min.to_string())
            .replace("{ai_max}", &self.ai_max.to_string()))
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    async fn enrich(
        &self,
        records: &[EnrichmentRequestRecord],
        criteria: &QualificationCriteria,
    ) -> Result<Vec<EnrichmentResponseItem>, EnrichmentError> {
        let prompt = self.build_prompt(records, criteria)?;
        self.llm
            .call_json_with_search::<Vec<EnrichmentResponseItem>>(
                ENRICHMENT_MODEL,
                &prompt,
                ENRICHMENT_SYSTEM,
            )
            .await
            .map_err(|e| EnrichmentError::Call(e.to_string()))
    }
}
