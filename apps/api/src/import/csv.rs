//! Contact-export CSV parsing.
//!
//! Exports carry a free-text preamble ("Notes: ...") before the header row, so
//! the header is located by content rather than position. Columns are matched
//! case-insensitively in any order. Quoting follows RFC 4180, including quoted
//! newlines.

use serde::Serialize;

use crate::errors::AppError;
use crate::models::connection::ImportedConnection;

const FIRST_NAME: &str = "first name";
const LAST_NAME: &str = "last name";
const URL: &str = "url";
const EMAIL: &str = "email address";
const COMPANY: &str = "company";
const POSITION: &str = "position";
const CONNECTED_ON: &str = "connected on";

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub connections: Vec<ImportedConnection>,
    /// Data rows after the header, blank lines excluded.
    pub total_rows: usize,
    /// Rows dropped for a wrong field count or a missing name.
    pub skipped_rows: usize,
}

struct Columns {
    first_name: usize,
    last_name: usize,
    url: Option<usize>,
    email: Option<usize>,
    company: Option<usize>,
    position: Option<usize>,
    connected_on: Option<usize>,
    width: usize,
}

impl Columns {
    fn from_header(header: &[String]) -> Option<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        Some(Self {
            first_name: find(FIRST_NAME)?,
            last_name: find(LAST_NAME)?,
            url: find(URL),
            email: find(EMAIL),
            company: find(COMPANY),
            position: find(POSITION),
            connected_on: find(CONNECTED_ON),
            width: header.len(),
        })
    }

    fn extract(&self, record: &[String]) -> ImportedConnection {
        let get = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        ImportedConnection {
            first_name: get(Some(self.first_name)),
            last_name: get(Some(self.last_name)),
            url: get(self.url),
            email: get(self.email),
            company: get(self.company),
            position: get(self.position),
            connected_on: get(self.connected_on),
        }
    }
}

pub fn parse_connections(text: &str) -> Result<ImportReport, AppError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let records = split_records(text);

    let (header_at, columns) = records
        .iter()
        .enumerate()
        .find_map(|(i, r)| Columns::from_header(r).map(|c| (i, c)))
        .ok_or_else(|| {
            AppError::Validation(
                "CSV header not found: expected 'First Name' and 'Last Name' columns".to_string(),
            )
        })?;

    let mut connections = Vec::new();
    let mut total_rows = 0;
    let mut skipped_rows = 0;
    for record in &records[header_at + 1..] {
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        total_rows += 1;
        if record.len() != columns.width {
            skipped_rows += 1;
            continue;
        }
        let connection = columns.extract(record);
        if connection.first_name.is_empty() && connection.last_name.is_empty() {
            skipped_rows += 1;
            continue;
        }
        connections.push(connection);
    }

    Ok(ImportReport {
        connections,
        total_rows,
        skipped_rows,
    })
}

/// Splits text into records of fields. `""` inside a quoted field is a literal
/// quote; CR, LF and CRLF all end a record outside quotes.
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
