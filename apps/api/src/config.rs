use anyhow::{Context, Result};

use crate::ranking::tiers::TierThresholds;

/// Application configuration loaded from environment variables.
/// Fails at startup if a required variable is missing or a value is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent → runs are kept in memory for the life of the process.
    pub database_url: Option<String>,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub phase1_chunk_size: usize,
    pub enrichment_batch_size: i64,
    pub enrichment_cost_per_call: f64,
    pub claim_timeout_secs: i64,
    pub qualifier_batch_size: usize,
    pub tier_thresholds: TierThresholds,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let tier_thresholds = match std::env::var("TIER_THRESHOLDS") {
            Ok(raw) => TierThresholds::parse(&raw).context("TIER_THRESHOLDS is invalid")?,
            Err(_) => TierThresholds::default(),
        };

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            phase1_chunk_size: parse_env("PHASE1_CHUNK_SIZE", 500)?,
            enrichment_batch_size: parse_env("ENRICHMENT_BATCH_SIZE", 10)?,
            enrichment_cost_per_call: parse_env("ENRICHMENT_COST_PER_CALL", 0.02)?,
            claim_timeout_secs: parse_env("CLAIM_TIMEOUT_SECS", 300)?,
            qualifier_batch_size: parse_env("QUALIFIER_BATCH_SIZE", 50)?,
            tier_thresholds,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
