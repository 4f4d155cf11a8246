//! Campaign pipeline orchestration.
//!
//! A campaign flows through:
//! 1. Prompt parsing (non-fatal profile enrichment)
//! 2. Classification → Retrieval → Channel decision → Content generation
//! 3. `awaiting_approval` for a reviewer, or straight to `approved`
//! 4. Dispatch, invoked after the pipeline lock is released

pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunOutcome};
