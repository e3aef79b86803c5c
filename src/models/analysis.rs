//! Analysis lifecycle records.
//!
//! An `AnalysisRecord` is one verdict attempt for a procurement version.
//! Its status moves through a small state machine; every transition is
//! also recorded as an immutable `StatusHistoryEntry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::Verdict;

/// Lifecycle status of an analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    PendingTokenCalculation,
    PendingAnalysis,
    AnalysisInProgress,
    AnalysisSuccessful,
    AnalysisFailed,
    Timeout,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingTokenCalculation => "PENDING_TOKEN_CALCULATION",
            Self::PendingAnalysis => "PENDING_ANALYSIS",
            Self::AnalysisInProgress => "ANALYSIS_IN_PROGRESS",
            Self::AnalysisSuccessful => "ANALYSIS_SUCCESSFUL",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING_TOKEN_CALCULATION" => Some(Self::PendingTokenCalculation),
            "PENDING_ANALYSIS" => Some(Self::PendingAnalysis),
            "ANALYSIS_IN_PROGRESS" => Some(Self::AnalysisInProgress),
            "ANALYSIS_SUCCESSFUL" => Some(Self::AnalysisSuccessful),
            "ANALYSIS_FAILED" => Some(Self::AnalysisFailed),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Successful is terminal; failed/timeout are terminal only once the
    /// retry budget is exhausted, which the scheduler decides.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::AnalysisSuccessful | Self::AnalysisFailed | Self::Timeout
        )
    }

    /// Whether a record in this status blocks creating another analysis
    /// for the same procurement version.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::PendingTokenCalculation | Self::PendingAnalysis | Self::AnalysisInProgress
        )
    }

    /// Statuses eligible for backoff-gated retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AnalysisFailed | Self::Timeout)
    }
}

/// Token counts reported by one AI call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub search_queries: u64,
}

/// Monetary cost of one AI call, broken down by token category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub thinking_cost: f64,
    pub search_cost: f64,
    pub total_cost: f64,
}

/// One verdict attempt for a procurement version.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: uuid::Uuid,
    pub procurement_control_number: String,
    pub version_number: i64,
    pub status: AnalysisStatus,
    /// Fingerprint over the selected evidence set, for idempotency.
    pub document_hash: String,
    pub verdict: Option<Verdict>,
    /// Rendered pipeline warnings surfaced alongside the verdict.
    pub warnings: Vec<String>,
    pub tokens: TokenUsage,
    pub costs: CostBreakdown,
    pub priority_score: i64,
    pub votes_count: i64,
    pub retry_count: i64,
    pub analysis_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit-trail entry for one status transition.
#[derive(Debug, Clone)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub analysis_id: uuid::Uuid,
    pub status: AnalysisStatus,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable accounting line for one AI call.
#[derive(Debug, Clone)]
pub struct BudgetLedgerEntry {
    pub id: i64,
    pub analysis_id: uuid::Uuid,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            AnalysisStatus::PendingTokenCalculation,
            AnalysisStatus::PendingAnalysis,
            AnalysisStatus::AnalysisInProgress,
            AnalysisStatus::AnalysisSuccessful,
            AnalysisStatus::AnalysisFailed,
            AnalysisStatus::Timeout,
        ] {
            assert_eq!(AnalysisStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AnalysisStatus::from_str("NOPE"), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(AnalysisStatus::PendingAnalysis.is_active());
        assert!(AnalysisStatus::AnalysisInProgress.is_active());
        assert!(!AnalysisStatus::AnalysisFailed.is_active());

        assert!(AnalysisStatus::AnalysisFailed.is_retryable());
        assert!(AnalysisStatus::Timeout.is_retryable());
        assert!(!AnalysisStatus::AnalysisSuccessful.is_retryable());
    }
}
