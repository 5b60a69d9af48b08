//! Query surface over scored connections: tier filter, free-text search,
//! sort, pagination. The in-memory store applies these functions directly;
//! the Postgres store mirrors them in SQL.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::scored::{ScoredConnection, Tier};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Rank ascending; unranked rows last, ordered by score.
    #[default]
    Rank,
    /// Total score descending.
    Score,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionQuery {
    pub tier: Option<Tier>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ConnectionQuery {
    /// Page number, 1-based.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        (self.page() as u64 - 1) * self.page_size() as u64
    }

    /// Lower-cased, trimmed search term; `None` when blank.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let size = self.page_size();
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPage {
    pub items: Vec<ScoredConnection>,
    /// Rows matching the filters, before pagination.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

pub fn matches_query(row: &ScoredConnection, query: &ConnectionQuery) -> bool {
    if let Some(tier) = query.tier {
        if row.tier != tier {
            return false;
        }
    }
    match query.search_term() {
        None => true,
        Some(term) => {
            let c = &row.connection;
            [&c.first_name, &c.last_name, &c.company, &c.position]
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
                || c.full_name().to_lowercase().contains(&term)
        }
    }
}

/// Ordering used by exports and by the rank sort.
pub fn compare_by_rank(a: &ScoredConnection, b: &ScoredConnection) -> Ordering {
    match (a.rank_position, b.rank_position) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => compare_by_score(a, b),
    }
}

/// Total score descending, import order breaking ties.
pub fn compare_by_score(a: &ScoredConnection, b: &ScoredConnection) -> Ordering {
    b.total_score
        .partial_cmp(&a.total_score)
        .unwrap_or(Ordering::Equal)
        .then(a.connection.row_index.cmp(&b.connection.row_index))
}

pub fn apply_query(rows: &[ScoredConnection], query: &ConnectionQuery) -> ConnectionPage {
    let mut matched: Vec<&ScoredConnection> =
        rows.iter().filter(|r| matches_query(r, query)).collect();
    match query.sort {
        SortKey::Rank => matched.sort_by(|a, b| compare_by_rank(a, b)),
        SortKey::Score => matched.sort_by(|a, b| compare_by_score(a, b)),
    }
    let total = matched.len() as u64;
    let items = matched
        .into_iter()
        .skip(query.offset() as usize)
        .take(query.page_size() as usize)
        .cloned()
        .collect();
    ConnectionPage {
        items,
        total,
        page: query.page(),
        page_size: query.page_size(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use uuid::Uuid;

    use crate::models::connection::Connection;
    use crate::models::scored::{EnrichmentStatus, ScoredConnection, Tier};

    pub fn scored(run_id: Uuid, row_index: i32, name: &str, total: f64, tier: Tier) -> ScoredConnection {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        ScoredConnection {
            connection: Connection {
                id: Uuid::new_v4(),
                run_id,
                row_index,
                first_name: first.to_string(),
                last_name: last.to_string(),
                url: format!("https://example.com/in/{row_index}"),
                email: String::new(),
                company: "Initech".to_string(),
                position: "Engineer".to_string(),
                connected_on: "01 Jan 2024".to_string(),
            },
            title_score: total,
            company_score: 0.0,
            recency_score: 0.0,
            ai_score: None,
            total_score: total,
            tier,
            is_protected: tier == Tier::Protected,
            protected_reason: None,
            enrichment_status: tier.is_gray_zone().then_some(EnrichmentStatus::Pending),
            geography: None,
            industry: None,
            company_size: None,
            ai_reasoning: None,
            enrichment_error: None,
            claimed_at: None,
            user_override: None,
            rank_position: None,
        }
    }
}
