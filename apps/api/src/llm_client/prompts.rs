// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

use crate::models::criteria::QualificationCriteria;

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Renders the ICP criteria as a compact block shared by classifier and enricher prompts.
pub fn render_criteria(criteria: &QualificationCriteria) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };
    format!(
        "Target job titles: {}\nTarget industries: {}\nExcluded titles: {}\nExcluded companies: {}\nIdeal customer description: {}",
        list(&criteria.target_titles),
        list(&criteria.target_industries),
        list(&criteria.exclude_titles),
        list(&criteria.exclude_companies),
        if criteria.description.trim().is_empty() {
            "(none)"
        } else {
            criteria.description.trim()
        }
    )
}
