//! Local elimination before any classifier call.

use crate::models::connection::ImportedConnection;
use crate::models::criteria::QualificationCriteria;

/// Reason a record is eliminated without a classifier call, if any.
pub fn elimination_reason(
    connection: &ImportedConnection,
    criteria: &QualificationCriteria,
) -> Option<String> {
    let title = connection.position.trim().to_lowercase();
    let company = connection.company.trim().to_lowercase();

    if title.is_empty() && company.is_empty() {
        return Some("No title or company to evaluate".to_string());
    }

    if !title.is_empty() {
        if let Some(term) = first_match(&title, &criteria.exclude_titles) {
            return Some(format!("Title matches excluded term '{term}'"));
        }
    }
    if !company.is_empty() {
        if let Some(term) = first_match(&company, &criteria.exclude_companies) {
            return Some(format!("Company matches excluded term '{term}'"));
        }
    }
    None
}

fn first_match<'a>(haystack: &str, terms: &'a [String]) -> Option<&'a str> {
    terms
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(position: &str, company: &str) -> ImportedConnection {
        ImportedConnection {
            first_name: "Lee".to_string(),
            position: position.to_string(),
            company: company.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_record_is_eliminated() {
        let reason = elimination_reason(&contact("  ", ""), &QualificationCriteria::default());
        assert_eq!(reason.as_deref(), Some("No title or company to evaluate"));
    }

    #[test]
    fn test_exclusions_are_case_insensitive() {
        let criteria = QualificationCriteria {
            exclude_titles: vec!["Recruiter".to_string()],
            exclude_companies: vec!["Globex".to_string()],
            ..Default::default()
        };
        assert!(elimination_reason(&contact("Senior recruiter", "Acme"), &criteria)
            .unwrap()
            .contains("Recruiter"));
        assert!(elimination_reason(&contact("CTO", "GLOBEX Corp"), &criteria)
            .unwrap()
            .starts_with("Company"));
        assert!(elimination_reason(&contact("CTO", "Acme"), &criteria).is_none());
    }

    #[test]
    fn test_title_alone_is_enough_to_evaluate() {
        assert!(elimination_reason(&contact("Founder", ""), &QualificationCriteria::default()).is_none());
    }
}
