use std::sync::Arc;

use crate::config::Config;
use crate::qualify::classifier::Classifier;
use crate::ranking::phase1::Phase1Settings;
use crate::ranking::store::RunStore;
use crate::ranking::worker::{EnrichmentWorker, WorkerRegistry};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RunStore>,
    /// Phase 2 worker; holds the enricher, thresholds and claim settings.
    pub worker: Arc<EnrichmentWorker>,
    pub workers: WorkerRegistry,
    /// Pluggable classifier for the standard qualifier. Default: LlmClassifier.
    pub classifier: Arc<dyn Classifier>,
    pub phase1: Phase1Settings,
    pub config: Config,
}
