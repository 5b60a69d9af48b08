//! Classifier seam for the standard qualifier.
//!
//! A classifier returns one raw JSON entry per record, aligned by index.
//! Entries are interpreted leniently: anything missing or malformed becomes
//! `not_qualified` with `low` confidence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm_client::prompts::{render_criteria, JSON_ONLY_SYSTEM};
use crate::llm_client::{LlmClient, CLASSIFIER_MODEL};
use crate::models::connection::ImportedConnection;
use crate::models::criteria::QualificationCriteria;
use crate::qualify::prompts::CLASSIFIER_PROMPT_TEMPLATE;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier call failed: {0}")]
    Call(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualification {
    Qualified,
    NotQualified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierRecord {
    pub name: String,
    pub company: String,
    pub title: String,
}

impl From<&ImportedConnection> for ClassifierRecord {
    fn from(c: &ImportedConnection) -> Self {
        Self {
            name: c.full_name(),
            company: c.company.clone(),
            title: c.position.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub qualification: Qualification,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl Verdict {
    pub fn not_qualified_low(reasoning: impl Into<String>) -> Self {
        Self {
            qualification: Qualification::NotQualified,
            confidence: Confidence::Low,
            reasoning: reasoning.into(),
        }
    }

    /// Reads one classifier entry. Only a well-formed entry can qualify a record.
    pub fn from_entry(entry: Option<&Value>) -> Self {
        #[derive(Deserialize)]
        struct Entry {
            qualification: Qualification,
            confidence: Confidence,
            #[serde(default)]
            reasoning: String,
        }
        match entry.map(|v| Entry::deserialize(v)) {
            Some(Ok(e)) => Self {
                qualification: e.qualification,
                confidence: e.confidence,
                reasoning: e.reasoning,
            },
            Some(Err(_)) => Self::not_qualified_low("Classifier returned a malformed entry"),
            None => Self::not_qualified_low("Classifier returned no entry for this record"),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        records: &[ClassifierRecord],
        criteria: &QualificationCriteria,
    ) -> Result<Vec<Value>, ClassifierError>;
}

/// Low-cost Claude backend.
pub struct LlmClassifier {
    llm: LlmClient,
}

impl LlmClassifier {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        records: &[ClassifierRecord],
        criteria: &QualificationCriteria,
    ) -> Result<Vec<Value>, ClassifierError> {
        let records_json = serde_json::to_string_pretty(records)
            .map_err(|e| ClassifierError::Call(format!("Failed to serialize records: {e}")))?;
        let prompt = CLASSIFIER_PROMPT_TEMPLATE
            .replace("{criteria}", &render_criteria(criteria))
            .replace("{records_json}", &records_json)
            .replace("{count}", &records.len().to_string());

        self.llm
            .call_json::<Vec<Value>>(CLASSIFIER_MODEL, &prompt, JSON_ONLY_SYSTEM)
            .await
            .map_err(|e| ClassifierError::Call(e.to_string()))
    }
}
