//! Aggressive ranking pipeline: deterministic scoring (Phase 1), web-grounded
//! enrichment of the gray zone (Phase 2), then finalization into a ranked list.

pub mod enrichment;
pub mod finalize;
pub mod handlers;
pub mod memory_store;
pub mod phase1;
pub mod prompts;
pub mod scorer;
pub mod state_machine;
pub mod store;
pub mod tiers;
pub mod worker;
