//! Deterministic Scorer: one connection + criteria + protected keywords → score breakdown.
//!
//! Pure: no I/O, and `today` is passed in, so chunks can be scored in any order
//! and every rule is unit-testable.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::connection::Connection;
use crate::models::criteria::{ProtectedKeywords, QualificationCriteria};

/// Terms in a title that signal the contact is outside any buying audience.
const DISQUALIFIER_TERMS: &[&str] = &[
    "student",
    "intern",
    "retired",
    "unemployed",
    "seeking",
    "looking for",
    "aspiring",
    "open to work",
    "volunteer",
];

/// Terms in a title that signal decision-making authority.
const SENIORITY_TERMS: &[&str] = &[
    "founder",
    "owner",
    "chief",
    "ceo",
    "cto",
    "cfo",
    "coo",
    "cmo",
    "president",
    "partner",
    "vp",
    "vice president",
    "director",
    "head of",
];

/// Tunable scoring weights. Directions are fixed (ICP matches add, disqualifiers
/// subtract); magnitudes and bounds are policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub title_min: f64,
    pub title_max: f64,
    pub title_exact: f64,
    pub title_partial: f64,
    pub title_word: f64,
    pub seniority_bonus: f64,
    pub disqualifier_penalty: f64,
    pub company_min: f64,
    pub company_max: f64,
    pub industry_company: f64,
    pub industry_title: f64,
    pub company_penalty: f64,
    pub blank_company_penalty: f64,
    pub recency_max: f64,
    pub recency_half_life_months: f64,
    /// Bounds applied to the enrichment service's AI score.
    pub ai_min: f64,
    pub ai_max: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_min: -40.0,
            title_max: 40.0,
            title_exact: 40.0,
            title_partial: 30.0,
            title_word: 15.0,
            seniority_bonus: 10.0,
            disqualifier_penalty: 40.0,
            company_min: -20.0,
            company_max: 20.0,
            industry_company: 20.0,
            industry_title: 10.0,
            company_penalty: 20.0,
            blank_company_penalty: 5.0,
            recency_max: 20.0,
            recency_half_life_months: 24.0,
            ai_min: -30.0,
            ai_max: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub title_score: f64,
    pub company_score: f64,
    pub recency_score: f64,
    pub total: f64,
    pub is_protected: bool,
    pub protected_reason: Option<String>,
}

/// Scores one connection. The protection check runs first and short-circuits.
pub fn score(
    connection: &Connection,
    criteria: &QualificationCriteria,
    keywords: &ProtectedKeywords,
    config: &ScoringConfig,
    today: NaiveDate,
) -> ScoreBreakdown {
    if let Some(reason) = protection_reason(&connection.company, &connection.position, keywords) {
        return ScoreBreakdown {
            title_score: 0.0,
            company_score: 0.0,
            recency_score: 0.0,
            total: 0.0,
            is_protected: true,
            protected_reason: Some(reason),
        };
    }

    let title_score = title_score(&connection.position, criteria, config);
    let company_score = company_score(&connection.company, &connection.position, criteria, config);
    let recency_score = parse_connected_on(&connection.connected_on)
        .map(|date| recency_score(date, today, config))
        .unwrap_or(0.0);

    ScoreBreakdown {
        title_score,
        company_score,
        recency_score,
        total: title_score + company_score + recency_score,
        is_protected: false,
        protected_reason: None,
    }
}

/// Case-insensitive substring match of any protected keyword in company or title.
pub fn protection_reason(
    company: &str,
    position: &str,
    keywords: &ProtectedKeywords,
) -> Option<String> {
    let company_lower = company.to_lowercase();
    let position_lower = position.to_lowercase();

    for list in keywords.lists() {
        for keyword in &list.keywords {
            let kw = keyword.trim().to_lowercase();
            if kw.is_empty() {
                continue;
            }
            let field = if company_lower.contains(&kw) {
                "company"
            } else if position_lower.contains(&kw) {
                "title"
            } else {
                continue;
            };
            let list_name = if list.name.trim().is_empty() {
                "protected"
            } else {
                list.name.as_str()
            };
            return Some(format!("{list_name} keyword '{}' in {field}", keyword.trim()));
        }
    }
    None
}

pub fn title_score(position: &str, criteria: &QualificationCriteria, config: &ScoringConfig) -> f64 {
    let title = normalize(position);
    if title.is_empty() {
        return 0.0;
    }

    let mut best_match = 0.0_f64;
    for target in &criteria.target_titles {
        let target = normalize(target);
        if target.is_empty() {
            continue;
        }
        let strength = if title == target {
            config.title_exact
        } else if title.contains(&target) {
            config.title_partial
        } else if shares_word(&title, &target) {
            config.title_word
        } else {
            0.0
        };
        best_match = best_match.max(strength);
    }

    let mut score = best_match;
    if SENIORITY_TERMS.iter().any(|t| contains_term(&title, t)) {
        score += config.seniority_bonus;
    }
    if DISQUALIFIER_TERMS.iter().any(|t| contains_term(&title, t)) {
        score -= config.disqualifier_penalty;
    }
    if criteria
        .exclude_titles
        .iter()
        .map(|t| normalize(t))
        .any(|t| !t.is_empty() && title.contains(&t))
    {
        score -= config.disqualifier_penalty;
    }

    score.clamp(config.title_min, config.title_max)
}

pub fn company_score(
    company: &str,
    position: &str,
    criteria: &QualificationCriteria,
    config: &ScoringConfig,
) -> f64 {
    let company = normalize(company);
    let title = normalize(position);

    let mut score = 0.0;
    if company.is_empty() {
        score -= config.blank_company_penalty;
    }

    let industries: Vec<String> = criteria
        .target_industries
        .iter()
        .map(|i| normalize(i))
        .filter(|i| !i.is_empty())
        .collect();
    if !company.is_empty() && industries.iter().any(|i| company.contains(i.as_str())) {
        score += config.industry_company;
    } else if industries.iter().any(|i| title.contains(i.as_str())) {
        score += config.industry_title;
    }

    if !company.is_empty()
        && criteria
            .exclude_companies
            .iter()
            .map(|c| normalize(c))
            .any(|c| !c.is_empty() && company.contains(&c))
    {
        score -= config.company_penalty;
    }

    score.clamp(config.company_min, config.company_max)
}

/// Exponential decay from the connection date, capped at `recency_max`.
pub fn recency_score(connected_on: NaiveDate, today: NaiveDate, config: &ScoringConfig) -> f64 {
    let months = months_between(connected_on, today);
    if months <= 0.0 {
        return config.recency_max;
    }
    (config.recency_max * 0.5_f64.powf(months / config.recency_half_life_months))
        .clamp(0.0, config.recency_max)
}

/// Parses the export formats seen in contact exports: `15 Mar 2023`,
/// `2023-03-15`, `03/15/2023`.
pub fn parse_connected_on(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    ["%d %b %Y", "%Y-%m-%d", "%m/%d/%Y", "%d %B %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn months_between(start: NaiveDate, end: NaiveDate) -> f64 {
    let years = end.year() - start.year();
    let months = end.month() as i32 - start.month() as i32;
    let total = years * 12 + months;
    let day_frac = (end.day() as f64 - start.day() as f64) / 30.0;
    (total as f64 + day_frac).max(0.0)
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Word-boundary aware containment so "cto" does not match "director".
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.contains(' ') {
        return haystack.contains(term);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == term)
}

fn shares_word(a: &str, b: &str) -> bool {
    const STOPWORDS: &[&str] = &["of", "and", "the", "&", "at", "for", "a"];
    let words_b: Vec<&str> = b
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .collect();
    a.split_whitespace().any(|w| words_b.contains(&w))
}
