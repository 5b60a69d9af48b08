//! Export projections over a run's scored rows, rendered as CSV.

use std::fmt::Write as _;

use serde::Deserialize;

use crate::models::scored::ScoredConnection;

pub const EXPORT_COLUMNS: [&str; 17] = [
    "rank",
    "first_name",
    "last_name",
    "url",
    "email",
    "company",
    "position",
    "connected_on",
    "title_score",
    "company_score",
    "recency_score",
    "ai_score",
    "tier",
    "protected",
    "geography",
    "industry",
    "override",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// Records to disconnect.
    #[default]
    Removal,
    /// Everything not on the removal list.
    Keep,
    Full,
}

impl ExportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Removal => "removal",
            ExportKind::Keep => "keep",
            ExportKind::Full => "full",
        }
    }

    pub fn includes(&self, row: &ScoredConnection) -> bool {
        match self {
            ExportKind::Removal => row.is_marked_for_removal(),
            ExportKind::Keep => !row.is_marked_for_removal(),
            ExportKind::Full => true,
        }
    }
}

/// Filters rows (already in rank order) down to one projection.
pub fn project(rows: &[ScoredConnection], kind: ExportKind) -> Vec<&ScoredConnection> {
    rows.iter().filter(|r| kind.includes(r)).collect()
}

pub struct CsvExporter;

impl CsvExporter {
    pub fn to_string<'a, I>(rows: I) -> String
    where
        I: IntoIterator<Item = &'a ScoredConnection>,
    {
        let mut output = String::new();
        output.push_str(&EXPORT_COLUMNS.join(","));
        output.push_str("\r\n");

        for row in rows {
            let c = &row.connection;
            let fields = [
                row.rank_position.map(|r| r.to_string()).unwrap_or_default(),
                c.first_name.clone(),
                c.last_name.clone(),
                c.url.clone(),
                c.email.clone(),
                c.company.clone(),
                c.position.clone(),
                c.connected_on.clone(),
                format_score(row.title_score),
                format_score(row.company_score),
                format_score(row.recency_score),
                row.ai_score.map(format_score).unwrap_or_default(),
                row.tier.as_str().to_string(),
                row.is_protected.to_string(),
                row.geography.clone().unwrap_or_default(),
                row.industry.clone().unwrap_or_default(),
                row.user_override
                    .map(|o| o.as_str().to_string())
                    .unwrap_or_default(),
            ];
            let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
            // Writing into a String cannot fail.
            let _ = write!(output, "{}\r\n", line.join(","));
        }

        output
    }
}

fn format_score(score: f64) -> String {
    format!("{score:.2}")
}

/// Quotes a field containing a comma, quote, CR or LF; doubles inner quotes.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::scored::{Tier, UserOverride};
    use crate::results::query::fixtures::scored;

    fn rows() -> Vec<ScoredConnection> {
        let run_id = Uuid::new_v4();
        let mut rows: Vec<ScoredConnection> = [
            (60.0, Tier::DefiniteKeep),
            (35.0, Tier::StrongKeep),
            (15.0, Tier::Borderline),
            (0.0, Tier::LikelyRemove),
            (-30.0, Tier::DefiniteRemove),
            (0.0, Tier::Protected),
            (-5.0, Tier::LikelyRemove),
            (45.0, Tier::StrongKeep),
        ]
        .iter()
        .enumerate()
        .map(|(i, (total, tier))| scored(run_id, i as i32, "Kim Park", *total, *tier))
        .collect();
        rows[6].user_override = Some(UserOverride::Keep);
        rows[7].user_override = Some(UserOverride::Remove);
        rows
    }

    #[test]
    fn test_removal_and_keep_partition_every_record() {
        let rows = rows();
        let removal = project(&rows, ExportKind::Removal);
        let keep = project(&rows, ExportKind::Keep);
        assert_eq!(removal.len() + keep.len(), rows.len());
        for row in &rows {
            let in_removal = removal.iter().any(|r| r.connection.id == row.connection.id);
            let in_keep = keep.iter().any(|r| r.connection.id == row.connection.id);
            assert!(in_removal ^ in_keep);
        }
        assert_eq!(project(&rows, ExportKind::Full).len(), rows.len());
    }

    #[test]
    fn test_overrides_move_rows_between_lists() {
        let rows = rows();
        let removal = project(&rows, ExportKind::Removal);
        // likely_remove kept by override
        assert!(!removal.iter().any(|r| r.connection.row_index == 6));
        // strong_keep removed by override
        assert!(removal.iter().any(|r| r.connection.row_index == 7));
        assert_eq!(removal.len(), 3);
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let mut rows = rows();
        rows[0].connection.company = "Smith, Jones & \"Partners\"".to_string();
        rows[0].connection.position = "Founder\nAdvisor".to_string();
        rows[0].rank_position = Some(1);
        let csv = CsvExporter::to_string(&rows[..1]);

        let mut lines = csv.split("\r\n");
        assert_eq!(lines.next().unwrap(), EXPORT_COLUMNS.join(","));
        assert!(csv.contains("\"Smith, Jones & \"\"Partners\"\"\""));
        assert!(csv.contains("\"Founder\nAdvisor\""));
        assert!(csv.starts_with("rank,first_name"));
        assert!(csv.contains("\r\n1,Kim,Park,"));
    }

    #[test]
    fn test_escape_field_leaves_plain_values() {
        assert_eq!(escape_field("Acme"), "Acme");
        assert_eq!(escape_field(""), "");
        assert_eq!(escape_field("a\rb"), "\"a\rb\"");
    }
}
