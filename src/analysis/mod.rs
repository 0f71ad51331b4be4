//! Two-stage analysis pipeline over cached proposal content

pub mod group;
pub mod orchestrator;
pub mod prompts;
pub mod result;
pub mod task;

pub use group::{GroupOutcome, TaskGroup, UnitOutcome};
pub use orchestrator::Orchestrator;
pub use result::{AnalysisResult, BatchTimedOut, ResultBundle, TaskStatus};
pub use task::{Enrichment, TaskSpec, parse_payload};
