//! Standard qualifier: a single-pass, non-resumable qualified / not-qualified
//! verdict per record.

pub mod classifier;
pub mod handlers;
pub mod pipeline;
pub mod prefilter;
pub mod prompts;
