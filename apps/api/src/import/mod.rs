//! Contact-export import shared by both pipelines.

pub mod csv;
pub mod handlers;
