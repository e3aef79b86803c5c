//! Core domain models.

mod analysis;
mod candidate;
mod procurement;

pub use analysis::{
    AnalysisRecord, AnalysisStatus, BudgetLedgerEntry, CostBreakdown, StatusHistoryEntry,
    TokenUsage,
};
pub use candidate::{
    extension_of, Artifact, ExclusionReason, FileCandidate, PipelineWarning, Prioritization,
    SourceDocument,
};
pub use procurement::{GovernmentEntity, Procurement, ProcurementVersion};
