use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::connection::Connection;

/// Removal-risk tier assigned to every scored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Tier {
    Protected,
    DefiniteRemove,
    LikelyRemove,
    Borderline,
    StrongKeep,
    DefiniteKeep,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Protected,
        Tier::DefiniteRemove,
        Tier::LikelyRemove,
        Tier::Borderline,
        Tier::StrongKeep,
        Tier::DefiniteKeep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Protected => "protected",
            Tier::DefiniteRemove => "definite_remove",
            Tier::LikelyRemove => "likely_remove",
            Tier::Borderline => "borderline",
            Tier::StrongKeep => "strong_keep",
            Tier::DefiniteKeep => "definite_keep",
        }
    }

    /// Tiers that land on the removal list unless overridden.
    pub fn is_removal(&self) -> bool {
        matches!(self, Tier::DefiniteRemove | Tier::LikelyRemove)
    }

    /// The gray zone. Only these records are sent to enrichment.
    pub fn is_gray_zone(&self) -> bool {
        matches!(self, Tier::Borderline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Advisory per-record decision. Never changes score or tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum UserOverride {
    Keep,
    Remove,
}

impl UserOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserOverride::Keep => "keep",
            UserOverride::Remove => "remove",
        }
    }
}

/// One scored row per connection per run. Keyed by the connection id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScoredConnection {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub connection: Connection,
    pub title_score: f64,
    pub company_score: f64,
    pub recency_score: f64,
    pub ai_score: Option<f64>,
    pub total_score: f64,
    pub tier: Tier,
    pub is_protected: bool,
    pub protected_reason: Option<String>,
    /// `None` for records outside the gray zone.
    pub enrichment_status: Option<EnrichmentStatus>,
    pub geography: Option<String>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub ai_reasoning: Option<String>,
    pub enrichment_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub user_override: Option<UserOverride>,
    /// Assigned once, at finalization.
    pub rank_position: Option<i64>,
}

impl ScoredConnection {
    /// Deterministic score before any AI adjustment.
    pub fn deterministic_score(&self) -> f64 {
        self.title_score + self.company_score + self.recency_score
    }

    /// Whether the record belongs on the removal list once overrides apply.
    pub fn is_marked_for_removal(&self) -> bool {
        match self.user_override {
            Some(UserOverride::Remove) => true,
            Some(UserOverride::Keep) => false,
            None => self.tier.is_removal(),
        }
    }
}
