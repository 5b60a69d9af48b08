use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::criteria::{ProtectedKeywords, QualificationCriteria};
use crate::models::scored::Tier;

/// Lifecycle status of a ranking run. Transition rules live in
/// `ranking::state_machine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Phase1Running,
    Phase1Complete,
    Phase2Running,
    Paused,
    Phase2Complete,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Phase1Running => "phase1_running",
            RunStatus::Phase1Complete => "phase1_complete",
            RunStatus::Phase2Running => "phase2_running",
            RunStatus::Paused => "paused",
            RunStatus::Phase2Complete => "phase2_complete",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier record counts. Sums to `total_records` once Phase 1 completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TierCounts {
    pub protected_count: i64,
    pub definite_remove_count: i64,
    pub likely_remove_count: i64,
    pub borderline_count: i64,
    pub strong_keep_count: i64,
    pub definite_keep_count: i64,
}

impl TierCounts {
    pub fn from_tiers<I: IntoIterator<Item = Tier>>(tiers: I) -> Self {
        let mut counts = Self::default();
        for tier in tiers {
            counts.add(tier, 1);
        }
        counts
    }

    pub fn add(&mut self, tier: Tier, n: i64) {
        *self.slot(tier) += n;
    }

    pub fn get(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Protected => self.protected_count,
            Tier::DefiniteRemove => self.definite_remove_count,
            Tier::LikelyRemove => self.likely_remove_count,
            Tier::Borderline => self.borderline_count,
            Tier::StrongKeep => self.strong_keep_count,
            Tier::DefiniteKeep => self.definite_keep_count,
        }
    }

    pub fn total(&self) -> i64 {
        Tier::ALL.iter().map(|t| self.get(*t)).sum()
    }

    fn slot(&mut self, tier: Tier) -> &mut i64 {
        match tier {
            Tier::Protected => &mut self.protected_count,
            Tier::DefiniteRemove => &mut self.definite_remove_count,
            Tier::LikelyRemove => &mut self.likely_remove_count,
            Tier::Borderline => &mut self.borderline_count,
            Tier::StrongKeep => &mut self.strong_keep_count,
            Tier::DefiniteKeep => &mut self.definite_keep_count,
        }
    }
}

/// The aggregate root of the ranking pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RankingRun {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub status: RunStatus,
    pub criteria: Json<QualificationCriteria>,
    pub protected_keywords: Json<ProtectedKeywords>,
    pub total_records: i64,
    pub phase1_processed: i64,
    #[sqlx(flatten)]
    pub tier_counts: TierCounts,
    /// Gray-zone size computed at the end of Phase 1.
    pub phase2_total: i64,
    pub phase2_processed: i64,
    pub phase2_calls: i64,
    pub phase2_failed: i64,
    pub phase2_cost: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase1_completed_at: Option<DateTime<Utc>>,
    pub phase2_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub owner_id: Uuid,
    pub name: String,
    pub criteria: QualificationCriteria,
    pub protected_keywords: ProtectedKeywords,
}

impl RankingRun {
    pub fn new(new_run: NewRun, total_records: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: new_run.owner_id,
            name: new_run.name,
            status: RunStatus::Pending,
            criteria: Json(new_run.criteria),
            protected_keywords: Json(new_run.protected_keywords),
            total_records,
            phase1_processed: 0,
            tier_counts: TierCounts::default(),
            phase2_total: 0,
            phase2_processed: 0,
            phase2_calls: 0,
            phase2_failed: 0,
            phase2_cost: 0.0,
            error_message: None,
            created_at: now,
            updated_at: now,
            phase1_completed_at: None,
            phase2_completed_at: None,
            completed_at: None,
        }
    }
}
