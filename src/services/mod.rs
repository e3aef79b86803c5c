//! Service layer: orchestration over the repositories, feed, storage,
//! queue, and the AI auditor.

pub mod analysis;
pub mod worker;

pub use analysis::{AnalysisService, ProcessOutcome};
pub use worker::{Worker, WorkerOptions};
