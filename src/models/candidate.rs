//! File candidates and their audit-trail metadata.
//!
//! Every file discovered for a procurement becomes a `FileCandidate`,
//! including the ones that end up excluded: the exclusion reason is part
//! of the audit trail and is never silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a file was left out of the evidence set.
///
/// Parameterized variants carry the limit value that was in force, so the
/// rendered message can interpolate it. Rendering to user-facing text
/// happens only at the presentation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    UnsupportedExtension,
    ExtractionFailed,
    ConversionFailed,
    LockFile,
    TokenLimitExceeded { limit: u64 },
    FileLimitExceeded { max_files: usize },
    TotalSizeLimitExceeded { limit_mb: f64 },
}

impl ExclusionReason {
    /// Render the pt-br message shown to users and stored in reports.
    pub fn render(&self) -> String {
        match self {
            Self::UnsupportedExtension => "Extensão de arquivo não suportada.".to_string(),
            Self::ExtractionFailed => {
                "Falha ao extrair o arquivo compactado. O arquivo pode estar corrompido ou \
                 protegido por senha."
                    .to_string()
            }
            Self::ConversionFailed => "Falha ao converter o arquivo.".to_string(),
            Self::LockFile => {
                "Arquivo de bloqueio temporário, ignorado pois não contém o documento real."
                    .to_string()
            }
            Self::TokenLimitExceeded { limit } => {
                format!("Arquivo excluído porque o limite de {limit} tokens foi excedido.")
            }
            Self::FileLimitExceeded { max_files } => {
                format!("Arquivo excluído porque o limite de {max_files} arquivos para análise foi excedido.")
            }
            Self::TotalSizeLimitExceeded { limit_mb } => {
                format!(
                    "Arquivo excluído porque o tamanho total dos arquivos excedeu o limite de {limit_mb:.1} MB."
                )
            }
        }
    }
}

/// Why a file was ranked where it was during selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prioritization {
    ByKeyword { keyword: String },
    ByMetadata { keyword: String },
    None,
}

impl Prioritization {
    pub fn render(&self) -> String {
        match self {
            Self::ByKeyword { keyword } => {
                format!("Priorizado por conter o termo '{keyword}' no nome.")
            }
            Self::ByMetadata { keyword } => {
                format!("Priorizado por conter o termo '{keyword}' nos metadados.")
            }
            Self::None => "Sem priorização.".to_string(),
        }
    }
}

/// Non-fatal problems detected while preparing files, surfaced to the
/// auditor prompt and to users alongside the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    IgnoredNonDataSheet { sheet_name: String, sheet_kind: String },
    PartialConversion { file_name: String },
    TokenLimitExceeded { limit: u64, ignored_files: Vec<String> },
    FileLimitExceeded { max_files: usize, ignored_files: Vec<String> },
    TotalSizeLimitExceeded { limit_mb: f64, ignored_files: Vec<String> },
    ArchiveExtractionFailed { path: String },
}

impl PipelineWarning {
    pub fn render(&self) -> String {
        match self {
            Self::IgnoredNonDataSheet { sheet_name, sheet_kind } => format!(
                "A planilha '{sheet_name}' foi ignorada por não conter dados tabulares (tipo: {sheet_kind})."
            ),
            Self::PartialConversion { file_name } => format!(
                "A conversão do arquivo '{file_name}' foi parcial. Alguns conteúdos (como \
                 gráficos ou abas sem dados) podem ter sido ignorados."
            ),
            Self::TokenLimitExceeded { limit, ignored_files } => format!(
                "O limite de {limit} tokens foi excedido. Os seguintes arquivos foram ignorados: {}",
                ignored_files.join(", ")
            ),
            Self::FileLimitExceeded { max_files, ignored_files } => format!(
                "Limite de {max_files} arquivos excedido. Ignorados: {}",
                ignored_files.join(", ")
            ),
            Self::TotalSizeLimitExceeded { limit_mb, ignored_files } => format!(
                "Limite de {limit_mb:.1} MB excedido. Ignorados: {}",
                ignored_files.join(", ")
            ),
            Self::ArchiveExtractionFailed { path } => format!(
                "Não foi possível extrair o arquivo compactado '{path}'; seu conteúdo foi ignorado."
            ),
        }
    }
}

/// One AI-ready file derived from a candidate by the conversion pipeline.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A single attachment link discovered for a procurement version.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: uuid::Uuid,
    pub analysis_id: uuid::Uuid,
    /// Stable identifier derived from the feed's document coordinates.
    pub synthetic_id: String,
    pub title: String,
    pub publication_date: Option<DateTime<Utc>>,
    pub document_type: Option<String>,
    pub url: Option<String>,
    pub raw_metadata: serde_json::Value,
}

/// One file extracted from a source document's payload, possibly nested
/// inside an archive. Mutated only by the selection phase; retained even
/// when excluded.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    /// Synthetic id of the originating source document.
    pub synthetic_id: String,
    /// Path inside the (possibly nested) archive structure.
    pub original_path: String,
    pub nesting_level: u32,
    pub original_content: Vec<u8>,
    /// Extension as declared by the path, lowercase without the dot.
    pub extension: Option<String>,
    /// Extension sniffed from content when the declared one is absent or
    /// contradicts the magic bytes. Recorded separately for audit.
    pub inferred_extension: Option<String>,
    /// AI-ready artifacts produced by the conversion pipeline.
    pub artifacts: Vec<Artifact>,
    pub used_fallback_conversion: bool,
    pub warnings: Vec<PipelineWarning>,
    pub included: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    pub prioritization: Prioritization,
    /// Pre-flight token estimate over the AI-ready artifacts.
    pub token_estimate: u64,
    /// Database id assigned once the file record is persisted.
    pub file_record_id: Option<uuid::Uuid>,
}

impl FileCandidate {
    pub fn new(synthetic_id: String, original_path: String, nesting_level: u32, content: Vec<u8>) -> Self {
        let extension = extension_of(&original_path);
        Self {
            synthetic_id,
            original_path,
            nesting_level,
            original_content: content,
            extension,
            inferred_extension: None,
            artifacts: Vec::new(),
            used_fallback_conversion: false,
            warnings: Vec::new(),
            included: false,
            exclusion_reason: None,
            prioritization: Prioritization::None,
            token_estimate: 0,
            file_record_id: None,
        }
    }

    /// Extension used for policy decisions: the inferred one wins when the
    /// declared extension is missing or contradicted by content sniffing.
    pub fn effective_extension(&self) -> Option<&str> {
        self.inferred_extension.as_deref().or(self.extension.as_deref())
    }

    /// Total size of the AI-ready artifacts (falls back to original bytes
    /// when no conversion produced anything yet).
    pub fn ai_size_bytes(&self) -> u64 {
        if self.artifacts.is_empty() {
            self.original_content.len() as u64
        } else {
            self.artifacts.iter().map(|a| a.bytes.len() as u64).sum()
        }
    }

    /// File name without directories, used in messages and records.
    pub fn file_name(&self) -> &str {
        self.original_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.original_path)
    }
}

/// Lowercase extension without the leading dot, if any.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
