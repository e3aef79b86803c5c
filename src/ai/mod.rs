//! Generative-AI auditor interface.
//!
//! The auditor accepts a prompt plus a bounded set of files and returns a
//! structured verdict constrained by a strict output schema, along with
//! token counts for pricing. A separate token-counting call (same inputs,
//! no generation) supports pre-flight budgeting.

mod gemini;

pub use gemini::{GeminiAuditor, GeminiConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::TokenUsage;

/// Closed set of irregularity categories the auditor may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedFlagCategory {
    #[serde(rename = "DIRECIONAMENTO")]
    Directing,
    #[serde(rename = "RESTRICAO_COMPETITIVIDADE")]
    CompetitionRestriction,
    #[serde(rename = "SOBREPRECO")]
    Overprice,
    #[serde(rename = "FRAUDE")]
    Fraud,
    #[serde(rename = "DOCUMENTACAO_IRREGULAR")]
    IrregularDocumentation,
    #[serde(rename = "OUTROS")]
    Other,
}

/// Severity levels for a red flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedFlagSeverity {
    #[serde(rename = "LEVE")]
    Mild,
    #[serde(rename = "MODERADA")]
    Moderate,
    #[serde(rename = "GRAVE")]
    Severe,
}

/// A single irregularity identified during the audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedFlag {
    pub category: RedFlagCategory,
    pub severity: RedFlagSeverity,
    /// Short, objective description of the issue (pt-br).
    pub description: String,
    /// Exact, literal quote from the document that evidences the finding.
    pub evidence_quote: String,
    /// Technical justification for why the quote represents a risk.
    pub auditor_reasoning: String,
}

/// Structured output of one procurement audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Risk level from 0 (none) to 10 (critical).
    pub risk_score: u8,
    pub risk_score_rationale: String,
    /// Concise summary of the procurement's scope (pt-br).
    pub procurement_summary: String,
    /// Concise summary of the overall analysis (pt-br).
    pub analysis_summary: String,
    #[serde(default)]
    pub red_flags: Vec<RedFlag>,
    #[serde(default)]
    pub seo_keywords: Vec<String>,
}

/// A named file sent to the auditor.
#[derive(Debug, Clone)]
pub struct AiFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Errors from the auditor.
#[derive(Debug, thiserror::Error)]
pub enum AuditorError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl AuditorError {
    /// Transient errors should be retried by the worker; parse and most
    /// API errors should not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

/// Capability interface to the generative-AI auditor.
#[async_trait]
pub trait Auditor: Send + Sync {
    /// Count the tokens the prompt and files would consume, without
    /// generating anything. Used for pre-flight budgeting.
    async fn count_tokens(&self, prompt: &str, files: &[AiFile]) -> Result<u64, AuditorError>;

    /// Run the audit and return the schema-constrained verdict plus the
    /// token counts reported by the model.
    async fn analyze(
        &self,
        prompt: &str,
        files: &[AiFile],
        max_output_tokens: Option<u32>,
    ) -> Result<(Verdict, TokenUsage), AuditorError>;
}
