//! Standard qualifier: pre-filter, then sequential classifier batches.
//! Single pass, nothing persisted.

use serde::Serialize;
use tracing::{info, warn};

use crate::models::connection::ImportedConnection;
use crate::models::criteria::QualificationCriteria;
use crate::qualify::classifier::{
    Classifier, ClassifierRecord, Confidence, Qualification, Verdict,
};
use crate::qualify::prefilter::elimination_reason;

pub const BATCH_FAILED_REASON: &str = "Batch processing failed — retry recommended";

#[derive(Debug, Clone, Serialize)]
pub struct QualificationResult {
    #[serde(flatten)]
    pub connection: ImportedConnection,
    pub qualification: Qualification,
    pub confidence: Confidence,
    pub reasoning: String,
    /// Eliminated locally, without a classifier call.
    pub prefiltered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualifySummary {
    pub total: usize,
    pub prefiltered: usize,
    pub qualified: usize,
    pub not_qualified: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualifyOutcome {
    /// One entry per input record, in input order.
    pub results: Vec<QualificationResult>,
    pub summary: QualifySummary,
}

pub async fn qualify(
    classifier: &dyn Classifier,
    connections: Vec<ImportedConnection>,
    criteria: &QualificationCriteria,
    batch_size: usize,
) -> QualifyOutcome {
    let total = connections.len();
    let mut slots: Vec<Option<QualificationResult>> = Vec::with_capacity(total);
    let mut pending: Vec<usize> = Vec::new();
    let mut summary = QualifySummary {
        total,
        ..Default::default()
    };

    for (i, connection) in connections.iter().enumerate() {
        match elimination_reason(connection, criteria) {
            Some(reason) => {
                summary.prefiltered += 1;
                slots.push(Some(QualificationResult {
                    connection: connection.clone(),
                    qualification: Qualification::NotQualified,
                    confidence: Confidence::High,
                    reasoning: reason,
                    prefiltered: true,
                }));
            }
            None => {
                slots.push(None);
                pending.push(i);
            }
        }
    }
    info!(total, prefiltered = summary.prefiltered, "Qualifier pre-filter complete");

    for (batch_no, batch) in pending.chunks(batch_size.max(1)).enumerate() {
        let records: Vec<ClassifierRecord> = batch
            .iter()
            .map(|&i| ClassifierRecord::from(&connections[i]))
            .collect();

        let verdicts: Vec<Verdict> = match classifier.classify(&records, criteria).await {
            Ok(entries) => {
                if entries.len() != records.len() {
                    warn!(
                        batch = batch_no,
                        expected = records.len(),
                        got = entries.len(),
                        "Classifier returned a mismatched entry count"
                    );
                }
                (0..records.len())
                    .map(|k| Verdict::from_entry(entries.get(k)))
                    .collect()
            }
            Err(e) => {
                warn!(batch = batch_no, error = %e, "Classifier batch failed");
                summary.failed_batches += 1;
                records
                    .iter()
                    .map(|_| Verdict::not_qualified_low(BATCH_FAILED_REASON))
                    .collect()
            }
        };

        for (&i, verdict) in batch.iter().zip(verdicts) {
            slots[i] = Some(QualificationResult {
                connection: connections[i].clone(),
                qualification: verdict.qualification,
                confidence: verdict.confidence,
                reasoning: verdict.reasoning,
                prefiltered: false,
            });
        }
    }

    let results: Vec<QualificationResult> = slots.into_iter().flatten().collect();
    debug_assert_eq!(results.len(), total, "every record gets exactly one result");
    summary.qualified = results
        .iter()
        .filter(|r| r.qualification == Qualification::Qualified)
        .count();
    summary.not_qualified = results.len() - summary.qualified;

    info!(
        total,
        qualified = summary.qualified,
        failed_batches = summary.failed_batches,
        "Qualification complete"
    );
    QualifyOutcome { results, summary }
}
