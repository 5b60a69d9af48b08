//! Results Store surface: query, overrides and CSV export.

pub mod export;
pub mod handlers;
pub mod query;
