mod config;
mod db;
mod errors;
mod import;
mod llm_client;
mod models;
mod qualify;
mod ranking;
mod results;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::qualify::classifier::LlmClassifier;
use crate::ranking::enrichment::LlmEnricher;
use crate::ranking::memory_store::InMemoryRunStore;
use crate::ranking::phase1::Phase1Settings;
use crate::ranking::scorer::ScoringConfig;
use crate::ranking::store::{PgRunStore, RunStore};
use crate::ranking::worker::{EnrichmentWorker, WorkerRegistry, WorkerSettings};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ranker API v{}", env!("CARGO_PKG_VERSION"));

    // Results store: PostgreSQL when configured, otherwise process memory
    let store: Arc<dyn RunStore> = match &config.database_url {
        Some(url) => Arc::new(PgRunStore::new(create_pool(url).await?)),
        None => {
            warn!("DATABASE_URL not set; runs are kept in memory and lost on restart");
            Arc::new(InMemoryRunStore::new())
        }
    };

    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!(
        "LLM client initialized (classifier: {}, enrichment: {})",
        llm_client::CLASSIFIER_MODEL,
        llm_client::ENRICHMENT_MODEL
    );

    let scoring = ScoringConfig::default();
    let thresholds = config.tier_thresholds;
    info!(cuts = ?thresholds.cuts(), "Tier thresholds loaded");

    let worker = Arc::new(EnrichmentWorker::new(
        store.clone(),
        Arc::new(LlmEnricher::new(llm.clone(), &scoring)),
        thresholds,
        scoring.clone(),
        WorkerSettings {
            batch_size: config.enrichment_batch_size,
            cost_per_call: config.enrichment_cost_per_call,
            claim_timeout: chrono::Duration::seconds(config.claim_timeout_secs),
        },
    ));

    let state = AppState {
        store,
        worker,
        workers: WorkerRegistry::new(),
        classifier: Arc::new(LlmClassifier::new(llm)),
        phase1: Phase1Settings {
            chunk_size: config.phase1_chunk_size,
            scoring,
            thresholds,
        },
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
